// Wire protocol shared by the sync client and the relay.

pub mod ws;
