//! Headless dragbox client.
//!
//! Opens the configured document from the local cache, joins the relay and
//! keeps the replica in sync until the run time elapses. With `DRAGBOX_WANDER`
//! set it also drags the box around a circle, which is handy for watching
//! replication from a second client.
//!
//! Configuration comes from the same `DRAGBOX_*` variables the core reads,
//! plus:
//! - `DRAGBOX_RUN_SECS`: stop after this many seconds (default: run forever)
//! - `DRAGBOX_WANDER`: `1` or `true` to drag the box

use dragbox_core::channel::ChannelError;
use dragbox_core::config::ConfigError;
use dragbox_core::session::SessionError;
use dragbox_core::storage::StorageError;
use dragbox_core::{
    Identity, InputEvent, MouseButton, NativeWebSocket, Point, RenderState, Session, SessionConfig, Vec2,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Client-only knobs layered on top of [`SessionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RunOptions {
    run_for: Option<Duration>,
    wander: bool,
}

impl RunOptions {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let run_for = match lookup("DRAGBOX_RUN_SECS") {
            Some(raw) => Some(raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                ConfigError::InvalidValue {
                    var: "DRAGBOX_RUN_SECS",
                    value: raw,
                }
            })?),
            None => None,
        };
        let wander = match lookup("DRAGBOX_WANDER").as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "DRAGBOX_WANDER",
                    value: other.to_string(),
                });
            }
        };
        Ok(Self { run_for, wander })
    }
}

/// Synthesizes a held drag that circles the point where it picked the box up.
struct Wander {
    center: Option<Point>,
    angle: f64,
}

impl Wander {
    const RADIUS: f64 = 40.0;
    const STEP: f64 = 0.1;

    fn new() -> Self {
        Self {
            center: None,
            angle: 0.0,
        }
    }

    /// Input for the next tick, given the box origin the session reports.
    fn next(&mut self, origin: Option<Point>) -> Option<InputEvent> {
        let Some(center) = self.center else {
            let origin = origin?;
            self.center = Some(origin);
            return Some(InputEvent::PointerDown {
                position: origin,
                button: MouseButton::Left,
                on_object: true,
            });
        };
        self.angle += Self::STEP;
        let offset = Vec2::new(self.angle.cos() - 1.0, self.angle.sin()) * Self::RADIUS;
        Some(InputEvent::PointerMove {
            position: center + offset,
            primary_down: true,
        })
    }
}

fn describe(state: &RenderState) -> String {
    let origin = match state.origin {
        Some(p) => format!("({:.1}, {:.1})", p.x, p.y),
        None => "unset".to_string(),
    };
    format!(
        "origin {} highlight {} peers {}",
        origin,
        state.highlight_color,
        state.peers.len()
    )
}

async fn run(config: SessionConfig, options: RunOptions) -> Result<(), ClientError> {
    let cache = Arc::new(config.file_cache()?);
    let identity = Identity::generate();
    log::info!(
        "Client {} ({}) opening {}",
        identity.client_id(),
        identity.color(),
        config.document_id
    );

    let server_url = config.server_url.clone();
    let mut session = Session::open(config, identity, cache)?;
    session.on_status(|status| log::info!("Relay connection: {:?}", status));
    session.restore().await?;

    let mut ws = NativeWebSocket::new();
    ws.connect(&server_url)?;

    let started = Instant::now();
    let mut wander = options.wander.then(Wander::new);
    let mut last = None;
    while options.run_for.is_none_or(|limit| started.elapsed() < limit) {
        session.pump(&mut ws);

        if let Some(event) = wander.as_mut().and_then(|w| w.next(session.document().origin())) {
            session.handle_input(&event);
        }

        let state = session.render_state();
        if last.as_ref() != Some(&state) {
            log::info!("{}", describe(&state));
            last = Some(state);
        }

        if let Err(e) = session.maybe_persist().await {
            log::warn!("Autosave failed: {}", e);
        }
        std::thread::sleep(TICK);
    }

    session.close().await?;
    // Deliver the release and leave frames before dropping the socket.
    session.pump(&mut ws);
    std::thread::sleep(TICK);
    ws.disconnect();
    Ok(())
}

fn main() {
    env_logger::init();

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    let options = match RunOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = pollster::block_on(run(config, options)) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key: &str| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_options_default() {
        assert_eq!(RunOptions::from_lookup(lookup(&[])).unwrap(), RunOptions::default());
    }

    #[test]
    fn test_options_parse() {
        let options =
            RunOptions::from_lookup(lookup(&[("DRAGBOX_RUN_SECS", "5"), ("DRAGBOX_WANDER", "true")])).unwrap();
        assert_eq!(options.run_for, Some(Duration::from_secs(5)));
        assert!(options.wander);

        assert!(RunOptions::from_lookup(lookup(&[("DRAGBOX_RUN_SECS", "soon")])).is_err());
        assert!(RunOptions::from_lookup(lookup(&[("DRAGBOX_WANDER", "maybe")])).is_err());
    }

    #[test]
    fn test_wander_waits_for_origin() {
        let mut wander = Wander::new();
        assert_eq!(wander.next(None), None);

        let origin = Point::new(5.0, 5.0);
        assert_eq!(
            wander.next(Some(origin)),
            Some(InputEvent::PointerDown {
                position: origin,
                button: MouseButton::Left,
                on_object: true,
            })
        );

        let Some(InputEvent::PointerMove { position, primary_down }) = wander.next(Some(origin)) else {
            panic!("expected a move");
        };
        assert!(primary_down);
        assert!((position - origin).hypot() <= 2.0 * Wander::RADIUS);
    }

    #[test]
    fn test_describe_unset_origin() {
        let state = RenderState {
            origin: None,
            highlight_color: dragbox_core::Color::TRANSPARENT,
            local_color: dragbox_core::Color::rgb(255, 0, 0),
            peers: Vec::new(),
        };
        assert_eq!(describe(&state), "origin unset highlight #00000000 peers 0");
    }
}
