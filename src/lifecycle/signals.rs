//! OS signal handling.
//!
//! # Responsibilities
//! - Map configured signal names to OS signals
//! - Wait for the first of several signals
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Names are accepted with or without the `SIG` prefix, any case
//! - Non-unix platforms only know Ctrl-C; every name maps to it

use std::collections::HashSet;
use std::io;

/// A signal that can start a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
    User1,
    User2,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Hangup => "SIGHUP",
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::User1 => "SIGUSR1",
            ShutdownSignal::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            ShutdownSignal::Interrupt => SignalKind::interrupt(),
            ShutdownSignal::Terminate => SignalKind::terminate(),
            ShutdownSignal::Hangup => SignalKind::hangup(),
            ShutdownSignal::Quit => SignalKind::quit(),
            ShutdownSignal::User1 => SignalKind::user_defined1(),
            ShutdownSignal::User2 => SignalKind::user_defined2(),
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a signal name such as `SIGTERM` or `term`.
pub fn parse_signal(name: &str) -> Option<ShutdownSignal> {
    let upper = name.trim().to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);
    match short {
        "INT" => Some(ShutdownSignal::Interrupt),
        "TERM" => Some(ShutdownSignal::Terminate),
        "HUP" => Some(ShutdownSignal::Hangup),
        "QUIT" => Some(ShutdownSignal::Quit),
        "USR1" => Some(ShutdownSignal::User1),
        "USR2" => Some(ShutdownSignal::User2),
        _ => None,
    }
}

/// Parse every name, skipping unknown ones (validation reports those).
/// Each signal appears once, in first-seen order.
pub fn parse_signals(names: &[String]) -> Vec<ShutdownSignal> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter_map(|n| parse_signal(n))
        .filter(|signal| seen.insert(*signal))
        .collect()
}

/// Wait for the first of `signals`. Handlers are registered before this
/// returns its future, so a signal sent right after the call is not lost.
#[cfg(unix)]
pub fn wait_for_any(
    signals: &[ShutdownSignal],
) -> io::Result<impl std::future::Future<Output = ShutdownSignal>> {
    use futures_util::future::select_all;
    use tokio::signal::unix::signal;

    let mut streams = Vec::with_capacity(signals.len());
    for sig in signals {
        streams.push((*sig, signal(sig.kind())?));
    }

    Ok(async move {
        if streams.is_empty() {
            return std::future::pending::<ShutdownSignal>().await;
        }
        let waits = streams.iter_mut().map(|(sig, stream)| {
            let sig = *sig;
            Box::pin(async move {
                stream.recv().await;
                sig
            })
        });
        let (sig, _, _) = select_all(waits).await;
        sig
    })
}

#[cfg(not(unix))]
pub fn wait_for_any(
    signals: &[ShutdownSignal],
) -> io::Result<impl std::future::Future<Output = ShutdownSignal>> {
    let first = signals.first().copied();
    Ok(async move {
        match first {
            Some(sig) => {
                let _ = tokio::signal::ctrl_c().await;
                sig
            }
            None => std::future::pending::<ShutdownSignal>().await,
        }
    })
}
