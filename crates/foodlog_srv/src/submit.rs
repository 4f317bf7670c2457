//! Accepting new food entries.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::*;

const REQUIRED_FIELDS: &str = "Name, calorie data, and image are required.";

/// An image file received with a submission.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// the client side file name, only the extension is kept
    pub file_name: String,

    /// file content
    pub content: bytes::Bytes,
}

/// The raw fields of an `addFoodData` submission.
#[derive(Debug, Clone, Default)]
pub struct FoodForm {
    /// `name`
    pub name: Option<String>,

    /// `cal`
    pub cal: Option<String>,

    /// `loc`
    pub loc: Option<String>,

    /// `tag`
    pub tag: Option<String>,

    /// `image`
    pub image: Option<UploadedImage>,
}

/// Validate and store a new food entry, attributing it to its category.
///
/// The entry and the category update are committed together or not at
/// all. Nothing is written if the category is unknown.
///
/// The two snapshots are published one after the other, categories
/// first. A reader that looks at both in between can see a category
/// that already counts an entry not yet listed, but never an entry its
/// category has not counted.
pub fn submit(
    store: &Store,
    uploads_dir: &Path,
    form: FoodForm,
) -> FoodResult<FoodEntry> {
    let FoodForm {
        name,
        cal,
        loc,
        tag,
        image,
    } = form;

    let (name, cal, image) = match (non_empty(name), non_empty(cal), image)
    {
        (Some(name), Some(cal), Some(image)) => (name, cal, image),
        _ => return Err(FoodError::validation(REQUIRED_FIELDS)),
    };

    let calories: u64 = cal.trim().parse().map_err(|_| {
        FoodError::validation(
            "Calorie data must be a non-negative whole number.",
        )
    })?;

    let tag = tag.unwrap_or_default();

    // lock order: food types, then food data
    let mut types = store.food_types.lock();
    let mut entries = store.food_data.lock();

    // fail on an unknown category before anything touches the disk
    if types.get(&tag).is_none() {
        return Err(FoodError::UnknownCategory(tag));
    }

    let image_file = save_image(uploads_dir, &image)?;
    let image_path = format!("/uploads/{image_file}");
    let image_file = uploads_dir.join(image_file);

    let stat = attribute_entry(&mut types, &tag, calories, &image_path)?;

    let entry = FoodEntry {
        name,
        calories,
        location: loc.unwrap_or_default(),
        category_tag: tag,
        image_path,
    };
    entries.push(entry.clone());

    if let Err(err) = types.persist() {
        discard_image(&image_file);
        return Err(err.into());
    }

    if let Err(err) = entries.persist() {
        if let Err(restore_err) = types.restore() {
            tracing::warn!(?restore_err, "Failed to restore food types file");
        }
        discard_image(&image_file);
        return Err(err.into());
    }

    // categories first, see above
    types.commit();
    entries.commit();

    tracing::info!(
        name = %entry.name,
        category = %stat.name,
        sample_count = stat.sample_count,
        average_calories = stat.average_calories,
        "Added food entry",
    );

    Ok(entry)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write an uploaded image under a fresh unique name, returning that name.
fn save_image(
    uploads_dir: &Path,
    image: &UploadedImage,
) -> std::io::Result<String> {
    std::fs::create_dir_all(uploads_dir)?;

    let millis = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);

    let file_name = format!("{millis}-{seq}{}", extension(&image.file_name));

    std::fs::write(uploads_dir.join(&file_name), &image.content)?;

    Ok(file_name)
}

fn discard_image(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!(?err, path = %path.display(), "Failed to remove image");
    }
}

/// The extension of a client supplied file name, including the dot,
/// or empty if there is no plain alphanumeric one.
fn extension(file_name: &str) -> String {
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}
