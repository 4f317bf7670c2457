#![deny(missing_docs)]
//! foodlog_srv is an HTTP server for logging food entries, keeping
//! per-category calorie aggregates, and pushing live change notifications
//! to connected clients.
//!
//! All state lives in a handful of json files that are loaded into memory
//! at startup and rewritten in full on every mutation. Every collection
//! has its own write lock, so concurrent submissions never lose an update
//! and never interleave two rewrites of the same file.
//!
//! For the wire format, please see the [spec].

/// This is a documentation module containing the foodlog_srv wire spec.
///
/// #### 1. Types
///
/// ```text
/// FoodEntry = {
///   "name": string,
///   "cal": number,
///   "loc": string,
///   "tag": string,
///   "imagePath": string
/// }
/// CategoryStat = {
///   "name": string,
///   "num": number,
///   "avgCal": number,
///   "imagePath": string | null,
///   "totalCal": number            // absent until the first sample
/// }
/// Group = { .. }                  // passed through untouched
/// ErrResponse = { "error": string }
/// ```
///
/// #### 2. REST API
///
/// - `GET /health`
///   - Response Body: `{}`
/// - `GET /api/foodData?search=<tag>`
///   - Response Body: `[ FoodEntry, .. ]`
///   - An empty `search` lists everything, otherwise only entries whose
///     `tag` equals `search` ignoring case.
/// - `GET /api/foodType?search=<name>`
///   - Response Body: `[ CategoryStat, .. ]`
///   - An empty `search` lists everything, otherwise only categories whose
///     `name` contains `search` ignoring case.
/// - `GET /api/groups`
///   - Response Body: `[ Group, .. ]`
/// - `POST /api/addFoodData`
///   - Request Body: `multipart/form-data` with text fields `name`, `cal`,
///     `loc`, `tag` and a file field `image`.
///   - Response Body (201):
///     `{ "message": "Food data added successfully!", "data": FoodEntry }`
///   - 400 `ErrResponse` if `name`, `cal` or the image are missing, `cal`
///     is not a non-negative whole number, or `tag` names no category.
///   - 500 `ErrResponse` if the collections could not be written.
/// - `GET /api/userCount`
///   - Response Body: `{ "count": number }`, the open notification streams.
/// - `GET /api/userPassword?userPassword=<url-encoded json>`
///   - The parameter is `{ "name": string, "password": string }`.
///   - Response Body: `{ "pass": "yes" | "no" | "new" }`
/// - `GET /api/notify`
///   - A `text/event-stream` of `data: <token>\n\n` frames.
///
/// #### 3. Submissions
///
/// - The category named by `tag` must already exist in `foodTypes.json`.
///   Categories are seeded out of band, a submission never creates one.
/// - A submission with an unknown category writes nothing at all.
/// - The first entry attributed to a category with `num == 0` sets
///   `avgCal` to its calories and `imagePath` to its image.
/// - Every later entry increments `num` and sets `avgCal` to the mean of
///   all attributed calories, rounded to the nearest integer with ties
///   rounded up.
/// - The entry and the category update are written together or not at all.
///
/// #### 4. Credentials
///
/// - An empty `name` is always answered `"no"`.
/// - A `name` seen for the first time is stored together with the supplied
///   `password` and answered `"new"`.
/// - Otherwise the answer is `"yes"` if the password equals the stored one
///   exactly, else `"no"`.
/// - Passwords are stored in plaintext.
///
/// #### 5. Notifications
///
/// | token          | sent when                                          |
/// |----------------|----------------------------------------------------|
/// | `connected`    | once, to a new stream only, right after it opens   |
/// | `clientUpdate` | to all streams, whenever a stream opens or closes  |
/// | `fetch`        | to all streams, after every accepted submission    |
///
/// Keep-alive comments are interleaved and should be ignored. Events reach
/// each stream in the order the server emitted them.
#[cfg(doc)]
pub mod spec {}

mod config;
pub use config::*;

mod error;
pub use error::*;

mod model;
pub use model::*;

mod store;
pub use store::*;

mod aggregate;
pub use aggregate::*;

mod registry;
pub use registry::*;

mod broadcast;
pub use broadcast::*;

mod credential;
pub use credential::*;

mod submit;
pub use submit::*;

mod http;
use http::*;

mod server;
pub use server::*;
