// commands/mod.rs
use futures_util::future::BoxFuture;
use metrics::counter;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::{
    devices::DeviceStore,
    error::AppError,
    metrics::{ACK_TIMEOUTS_TOTAL, ACKS_TOTAL, COMMANDS_TOTAL},
    models::{DeviceState, Switch},
    serial::SerialLink,
};

pub const ACK_PREFIX: &str = "OK:";
const BRIGHTNESS_PREFIX: &str = "LED_BRIGHTNESS:";

/// Commands understood by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    MotorOn,
    MotorOff,
    LedOn,
    LedOff,
    LedBrightness(u8),
}

impl DeviceCommand {
    pub fn motor(state: Switch) -> Self {
        match state {
            Switch::On => DeviceCommand::MotorOn,
            Switch::Off => DeviceCommand::MotorOff,
        }
    }

    pub fn led(state: Switch) -> Self {
        match state {
            Switch::On => DeviceCommand::LedOn,
            Switch::Off => DeviceCommand::LedOff,
        }
    }

    /// Parses a wire name such as `MOTOR_ON` or `LED_BRIGHTNESS:128`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "MOTOR_ON" => Some(DeviceCommand::MotorOn),
            "MOTOR_OFF" => Some(DeviceCommand::MotorOff),
            "LED_ON" => Some(DeviceCommand::LedOn),
            "LED_OFF" => Some(DeviceCommand::LedOff),
            other => other
                .strip_prefix(BRIGHTNESS_PREFIX)
                .and_then(|level| level.parse().ok())
                .map(DeviceCommand::LedBrightness),
        }
    }

    /// Reflects an acknowledged command into the device state.
    pub fn apply(&self, state: &mut DeviceState) {
        match *self {
            DeviceCommand::MotorOn => state.motor = Switch::On,
            DeviceCommand::MotorOff => state.motor = Switch::Off,
            DeviceCommand::LedOn => state.led = Switch::On,
            DeviceCommand::LedOff => state.led = Switch::Off,
            DeviceCommand::LedBrightness(level) => state.led_brightness = Some(level),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::MotorOn => f.write_str("MOTOR_ON"),
            DeviceCommand::MotorOff => f.write_str("MOTOR_OFF"),
            DeviceCommand::LedOn => f.write_str("LED_ON"),
            DeviceCommand::LedOff => f.write_str("LED_OFF"),
            DeviceCommand::LedBrightness(level) => write!(f, "{}{}", BRIGHTNESS_PREFIX, level),
        }
    }
}

/// Parses an `OK:<COMMAND>` acknowledge line. Anything else is `None`.
pub fn parse_ack(line: &str) -> Option<DeviceCommand> {
    line.trim()
        .strip_prefix(ACK_PREFIX)
        .and_then(DeviceCommand::parse)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub acknowledged: bool,
}

struct Pending {
    command: DeviceCommand,
    done: oneshot::Sender<()>,
}

/// Turns control intents into serial commands and device acks into state.
///
/// `send` holds an exclusive turn for the whole write-then-wait sequence, so
/// at most one command is outstanding. Acks are still matched by content;
/// an ack for a command nobody is waiting on updates state all the same.
pub struct Bridge {
    link: SerialLink,
    store: Arc<DeviceStore>,
    turn: Mutex<()>,
    pending: Mutex<Option<Pending>>,
    ack_timeout: Duration,
    require_ack: bool,
}

impl Bridge {
    pub fn new(
        link: SerialLink,
        store: Arc<DeviceStore>,
        ack_timeout: Duration,
        require_ack: bool,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            link,
            store,
            turn: Mutex::new(()),
            pending: Mutex::new(None),
            ack_timeout,
            require_ack,
        });

        let weak = Arc::downgrade(&bridge);
        bridge.link.on_line(Arc::new(move |line: String| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(bridge) = weak.upgrade() {
                    bridge.handle_line(&line).await;
                }
            })
        }));

        bridge
    }

    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    /// Writes `command` and waits up to the grace period for its ack.
    ///
    /// Succeeds once the write is flushed; `acknowledged` tells whether the
    /// device confirmed in time. With `require_ack` a missing ack is an error.
    pub async fn send(&self, command: DeviceCommand) -> Result<Outcome, AppError> {
        let _turn = self.turn.lock().await;

        let (done, acked) = oneshot::channel();
        *self.pending.lock().await = Some(Pending { command, done });

        if let Err(e) = self.link.write_line(&command.to_string()).await {
            self.pending.lock().await.take();
            return Err(e);
        }
        counter!(COMMANDS_TOTAL).increment(1);
        info!(%command, "Sent command");

        let acknowledged = matches!(
            tokio::time::timeout(self.ack_timeout, acked).await,
            Ok(Ok(()))
        );
        self.pending.lock().await.take();

        if !acknowledged {
            counter!(ACK_TIMEOUTS_TOTAL).increment(1);
            warn!(
                %command,
                timeout_ms = self.ack_timeout.as_millis() as u64,
                "No acknowledgment within grace period"
            );
            if self.require_ack {
                return Err(AppError::AckTimeout(command.to_string()));
            }
        }

        Ok(Outcome { acknowledged })
    }

    /// Handles one inbound line from the device.
    pub async fn handle_line(&self, line: &str) {
        let Some(command) = parse_ack(line) else {
            debug!(line, "Ignoring non-ack line");
            return;
        };

        counter!(ACKS_TOTAL).increment(1);
        self.store.update(|state| command.apply(state)).await;

        let mut pending = self.pending.lock().await;
        if let Some(waiter) = pending.take_if(|p| p.command == command) {
            let _ = waiter.done.send(());
        }
    }
}
