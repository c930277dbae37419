//! Cross-module scenarios: connection manager against scripted links, and
//! stores against the bus and an in-memory API.
