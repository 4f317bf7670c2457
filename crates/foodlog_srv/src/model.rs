//! Records held in the collection files.

use serde::{Deserialize, Serialize};

/// A submitted food entry. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodEntry {
    /// name
    pub name: String,

    /// calories
    #[serde(rename = "cal", default, deserialize_with = "de_lenient")]
    pub calories: u64,

    /// location
    #[serde(rename = "loc", default)]
    pub location: String,

    /// category tag, matched against [CategoryStat::name]
    #[serde(rename = "tag", default)]
    pub category_tag: String,

    /// path the uploaded image is addressed by
    #[serde(rename = "imagePath", default)]
    pub image_path: String,
}

/// The running aggregate for one food category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStat {
    /// unique category name
    pub name: String,

    /// number of entries attributed to this category
    #[serde(rename = "num", default, deserialize_with = "de_lenient")]
    pub sample_count: u64,

    /// rounded mean calories over all attributed entries
    #[serde(rename = "avgCal", default, deserialize_with = "de_lenient")]
    pub average_calories: u64,

    /// representative image, adopted from the first attributed entry
    #[serde(rename = "imagePath", default)]
    pub image_path: Option<String>,

    /// exact calorie sum over all attributed entries
    ///
    /// Seed files may omit this, see [CategoryStat::total_calories].
    #[serde(
        rename = "totalCal",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_calories: Option<u64>,
}

impl CategoryStat {
    /// A freshly seeded category with no samples.
    pub fn seed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sample_count: 0,
            average_calories: 0,
            image_path: None,
            total_calories: None,
        }
    }

    /// The exact calorie sum, falling back to `avgCal * num` for
    /// records that predate the `totalCal` field.
    pub fn total_calories(&self) -> u64 {
        self.total_calories.unwrap_or_else(|| {
            self.average_calories.saturating_mul(self.sample_count)
        })
    }
}

/// A group record. Only ever passed through, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(pub serde_json::Value);

/// A stored user/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    /// unique user name
    #[serde(default)]
    pub name: String,

    /// plaintext password, compared by exact equality
    #[serde(default)]
    pub password: String,
}

/// Older collection files hold whatever the form carried, so a count
/// may be a string, a fraction, negative, or `null`.
///
/// Strings are read by their leading digits and fractions truncated.
/// Anything without a usable non-negative value reads as 0.
fn de_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Str(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => 0,
        Some(Raw::Int(n)) => n,
        // saturating, NaN becomes 0
        Some(Raw::Float(f)) if f > 0.0 => f as u64,
        Some(Raw::Float(_)) => 0,
        Some(Raw::Str(s)) => leading_digits(&s),
    })
}

fn leading_digits(s: &str) -> u64 {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let len = s.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return 0;
    }
    s[..len].parse().unwrap_or(u64::MAX)
}
