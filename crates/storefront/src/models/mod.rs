//! Domain models for the storefront.
//!
//! These are validated domain types, separate from database row types. Row
//! decoding lives in `db` and converts into these.

pub mod download;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use download::{Download, NewDownload, Requester};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem};
pub use product::{Category, NewCategory, NewProduct, Product};
pub use session::{CurrentUser, keys as session_keys};
pub use user::{NewUser, User};
