//! # gateway
//!
//! Reverse proxy and certificate management for `reconcile` stacks.
//!
//! This crate provides:
//! - [`Renderer`]: nginx server blocks for a stack's public routes
//! - [`ProxyManager`]: validate-then-swap activation with reload and
//!   rollback, implementing [`reconcile::ProxyControl`]
//! - [`CertbotAgent`]: expiry tracking and renewal through certbot,
//!   implementing [`reconcile::CertificateControl`]
//! - [`WebhookAlert`]: JSON webhook delivery, implementing
//!   [`reconcile::AlertSink`]
//!
//! ## Example
//!
//! ```no_run
//! use gateway::{ProxyManager, Reload, Renderer};
//! use reconcile::{ProxyControl, Route};
//!
//! let renderer = Renderer::new("sonar", "/etc/letsencrypt/live").with_webroot("/var/www/acme");
//! let proxy = ProxyManager::new("/etc/nginx/conf.d/sonar.conf", renderer)
//!     .with_validate(vec!["nginx".into(), "-t".into()])
//!     .with_reload(Reload::Command(vec!["nginx".into(), "-s".into(), "reload".into()]));
//!
//! let routes = vec![Route {
//!     hostname: "sonar.example.com".into(),
//!     service: "app".into(),
//!     port: 9000,
//!     tls: true,
//! }];
//! if !proxy.in_sync(&routes).unwrap() {
//!     proxy.activate(&routes).unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod cert;
pub mod error;
pub mod proxy;
pub mod routes;

pub use alert::WebhookAlert;
pub use cert::CertbotAgent;
pub use error::{Error, ErrorCategory, Result};
pub use proxy::{ProxyManager, Reload};
pub use routes::Renderer;
