//! Shared vocabulary for the root store crates: actions, the root state
//! snapshot, store configuration, the error type, and small equality and
//! property-access helpers.
//!
//! ```
//! use rootstore_common::{select_payload, Action, RootState};
//! use serde_json::json;
//!
//! let action = Action::new("ADD_SAMPLE").with_payload("hello");
//! let state = RootState::new().with_slice("sample", select_payload(&action));
//! assert_eq!(state.slice("sample"), Some(&json!("hello")));
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod state;
pub mod utils;

pub use action::*;
pub use config::StoreConfig;
pub use error::RootStoreError;
pub use state::{RootState, RootStateDraft};
pub use utils::*;
