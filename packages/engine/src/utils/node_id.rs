// packages/engine/src/utils/node_id.rs
//! Node identity reported to the controller

use ulid::Ulid;

/// Generate a node id of the form `<hostname>_<ulid>`.
///
/// Called once per agent runner; the id stays fixed for the process lifetime.
pub fn generate_node_id() -> String {
    let host = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());

    format!("{}_{}", host, Ulid::new().to_string().to_lowercase())
}
