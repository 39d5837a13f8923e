// docsync-common: wire protocol and document change model shared by the
// sync client, the relay, and the CLI.

pub mod channel;
pub mod patch;
pub mod protocol;
pub mod types;
