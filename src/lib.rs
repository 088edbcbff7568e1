//! Mock HTTP Server
//!
//! A configuration-driven HTTP server that answers requests with stub
//! responses. Useful for testing, development, and demos.
//!
//! # Features
//!
//! - **Path Templates**: Bind `${name}` segments to path variables
//! - **Request Matching**: Guard endpoints by method, headers, query params, body
//! - **Dynamic Bodies**: `${request.path}` substitution or Handlebars templates
//! - **Latency Simulation**: Fixed, random-range or conditional delays
//! - **Hot Reload**: Swap in a new configuration when the file changes
//!
//! # Example Configuration
//!
//! ```yaml
//! endpoints:
//!   - method: GET
//!     path: /users/${id}
//!     responses:
//!       - id: found
//!         isDefault: true
//!         status: 200
//!         headers:
//!           Content-Type: application/json
//!         bodyTemplate: '{"id":"${request.pathVariables.id}"}'
//!         delayRange: true
//!         minDelay: 50
//!         maxDelay: 150
//! ```

pub mod config;
pub mod delay;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod request;
pub mod routes;
pub mod server;
pub mod template;
pub mod watcher;

pub use config::{Configuration, ServerSettings};
pub use error::{ConfigError, MockError};
pub use loader::{ConfigLoader, ConfigSource};
pub use request::MockRequest;
pub use server::{MockReply, MockServer, ServerStatus};
