/// The version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

lazy_static::lazy_static! {
    /// The user agent sent with every request to the agent.
    pub static ref USER_AGENT: String = format!("instana-collector/{}", VERSION);
}
