//! Incremental per-category calorie aggregates.

use crate::*;

/// Attribute a new entry to the category matching `tag` within an open
/// food type transaction, returning the updated category.
///
/// Fails with [FoodError::UnknownCategory] without touching the
/// working copy if no category matches `tag`. The caller must persist
/// and commit `types` for the update to take effect.
pub fn attribute_entry(
    types: &mut Txn<'_, CategoryStat>,
    tag: &str,
    calories: u64,
    image_path: &str,
) -> FoodResult<CategoryStat> {
    let stat = types
        .get_mut(tag)
        .ok_or_else(|| FoodError::UnknownCategory(tag.to_string()))?;

    apply_sample(stat, calories, image_path);

    Ok(stat.clone())
}

/// Fold one calorie sample into a category.
pub fn apply_sample(stat: &mut CategoryStat, calories: u64, image_path: &str) {
    if stat.sample_count == 0 {
        // a freshly seeded category adopts its first sample outright,
        // including the image
        stat.sample_count = 1;
        stat.average_calories = calories;
        stat.total_calories = Some(calories);
        stat.image_path = Some(image_path.to_string());
        return;
    }

    let total = stat.total_calories().saturating_add(calories);
    let count = stat.sample_count + 1;

    stat.sample_count = count;
    stat.total_calories = Some(total);
    stat.average_calories = rounded_mean(total, count);
}

/// `total / count` rounded to the nearest integer, ties away from zero.
pub fn rounded_mean(total: u64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    let total = total as u128;
    let count = count as u128;
    ((total * 2 + count) / (count * 2)) as u64
}
