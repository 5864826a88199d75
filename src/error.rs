//! §7 — the engine's typed error surface.

/// Errors the engine can return to a caller. Everything else described in
/// §7 (sink abort, watchdog timeout, post-completion no-ops) is modeled as
/// silent, terminal results rather than an `Err`, per the distilled spec.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// §7: any HPACK integrity break. Treated as dynamic-table-corrupting;
    /// the connection must be aborted. Surfaced to the caller only on the
    /// first response write for a stream — see `Engine::write_response_headers`.
    #[error("HPACK dynamic table corrupted during encoding")]
    HpackCorrupted(#[source] crate::hpack::HpackError),

    /// §7: `try_update_*_window` overflow. The ingress side escalates this
    /// to a connection-level protocol error; the engine itself just reports it.
    #[error("flow-control window overflow")]
    WindowOverflow,
}
