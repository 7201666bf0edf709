//! User-Agent string sent with every OAI-PMH request.

/// Tool description advertised to repository operators.
const UA_COMMENT: &str = "OAI-PMH harvester";

/// Default User-Agent identifying the harvester and its version.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("oai-mirror/{version} ({UA_COMMENT})")
}
