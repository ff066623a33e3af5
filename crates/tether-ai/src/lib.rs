//! AI completion client abstraction for Tether.
//!
//! Plugin commands receive an [`AiClient`] in their execution context. The
//! host ships a [`StubClient`]; real providers plug in behind the same trait.
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  AiClient trait                     │
//! │  - generate(GenerateRequest) -> str │
//! └─────────────────────────────────────┘
//!            │                │
//!            ▼                ▼
//!      ┌──────────┐     ┌──────────┐
//!      │   Stub   │     │   Mock   │
//!      └──────────┘     └──────────┘
//! ```

pub mod client;
pub mod error;

pub use client::{AiClient, GenerateRequest, SharedAiClient, StubClient, build_client};
#[cfg(any(test, feature = "testing"))]
pub use client::MockClient;
pub use error::{AiError, Result};
