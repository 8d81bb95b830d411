use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use perfektday_common::{
    config::IndicatorConfig, BlinkTiming, BlinkToken, Indicator, LedState,
    TOPIC_INDICATOR_STATE,
};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::warn;

#[async_trait]
pub trait LedOutput: Send + Sync {
    async fn write(&self, state: LedState, level: bool);
}

#[derive(Debug, Serialize)]
struct LedPayload {
    state: LedState,
    level: bool,
}

/// Publishes the LED to the GPIO bridge over MQTT.
pub struct MqttLed {
    mqtt: AsyncClient,
}

impl MqttLed {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self { mqtt }
    }
}

#[async_trait]
impl LedOutput for MqttLed {
    async fn write(&self, state: LedState, level: bool) {
        let payload = match serde_json::to_vec(&LedPayload { state, level }) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("indicator payload serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = self
            .mqtt
            .publish(TOPIC_INDICATOR_STATE, QoS::AtLeastOnce, true, payload)
            .await
        {
            warn!("indicator publish failed: {err}");
        }
    }
}

/// Drives an [`Indicator`] in real time. At most one blink task runs; a new
/// blink aborts the previous one.
#[derive(Clone)]
pub struct IndicatorRuntime {
    indicator: Arc<Mutex<Indicator>>,
    output: Arc<dyn LedOutput>,
    timing: BlinkTiming,
    blink_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl IndicatorRuntime {
    pub fn new(output: Arc<dyn LedOutput>, config: &IndicatorConfig) -> Self {
        Self {
            indicator: Arc::new(Mutex::new(Indicator::new())),
            output,
            timing: BlinkTiming {
                slow_period_ms: config.slow_blink_period_ms,
                fast_period_ms: config.fast_blink_period_ms,
            },
            blink_task: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn snapshot(&self) -> Indicator {
        self.indicator.lock().await.clone()
    }

    /// Publishes the boot state.
    pub async fn start(&self) {
        let state = self.indicator.lock().await.state();
        self.output.write(state, state == LedState::On).await;
    }

    pub async fn set_steady(&self, on: bool) {
        let state = {
            let mut indicator = self.indicator.lock().await;
            indicator.set_steady(on);
            indicator.state()
        };
        if !state.is_blinking() {
            self.output.write(state, on).await;
        }
    }

    /// Starts `pattern`. With no timeout it runs until [`stop_blinking`]
    /// or a newer blink.
    ///
    /// [`stop_blinking`]: Self::stop_blinking
    pub async fn blink_for(&self, pattern: LedState, timeout: Option<Duration>) {
        let token = self.indicator.lock().await.start_blink(pattern);

        let runtime = self.clone();
        let handle = tokio::spawn(async move { runtime.run_blink(token, timeout).await });
        if let Some(previous) = self.blink_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop_blinking(&self) {
        self.indicator.lock().await.request_stop();
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.blink_task.lock().await.take() {
            task.abort();
        }
        self.indicator.lock().await.shutdown();
        self.output.write(LedState::Off, false).await;
    }

    async fn run_blink(&self, token: BlinkToken, timeout: Option<Duration>) {
        let step = Duration::from_millis((self.timing.fast_period_ms / 2).max(1) as u64);
        let started = Instant::now();
        let mut interval = tokio::time::interval(step);
        let mut last_level = None;

        loop {
            interval.tick().await;
            let elapsed = started.elapsed();

            let (state, level) = {
                let mut indicator = self.indicator.lock().await;
                if !indicator.is_current(token) {
                    return;
                }
                let expired = timeout.is_some_and(|limit| elapsed >= limit);
                if indicator.stop_requested() || expired {
                    indicator.finish_blink(token);
                    let steady = indicator.state();
                    drop(indicator);
                    self.output.write(steady, steady == LedState::On).await;
                    return;
                }
                let phase_ms = elapsed.as_millis().try_into().unwrap_or(u64::MAX);
                (indicator.state(), indicator.level(phase_ms, self.timing))
            };

            if last_level != Some(level) {
                self.output.write(state, level).await;
                last_level = Some(level);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingLed {
        pub(crate) writes: StdMutex<Vec<(LedState, bool)>>,
    }

    impl RecordingLed {
        pub(crate) fn last(&self) -> Option<(LedState, bool)> {
            self.writes.lock().unwrap().last().copied()
        }
    }

    #[async_trait]
    impl LedOutput for RecordingLed {
        async fn write(&self, state: LedState, level: bool) {
            self.writes.lock().unwrap().push((state, level));
        }
    }

    fn fast_config() -> IndicatorConfig {
        IndicatorConfig {
            slow_blink_period_ms: 40,
            fast_blink_period_ms: 20,
            ..IndicatorConfig::default()
        }
    }

    #[tokio::test]
    async fn timed_blink_restores_steady_state() {
        let led = Arc::new(RecordingLed::default());
        let runtime = IndicatorRuntime::new(led.clone(), &fast_config());
        runtime.set_steady(false).await;

        runtime
            .blink_for(LedState::BlinkSlow, Some(Duration::from_millis(100)))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.snapshot().await.state(), LedState::BlinkSlow);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runtime.snapshot().await.state(), LedState::Off);
        assert_eq!(led.last(), Some((LedState::Off, false)));
        assert!(led
            .writes
            .lock()
            .unwrap()
            .iter()
            .any(|(state, level)| *state == LedState::BlinkSlow && *level));
    }

    #[tokio::test]
    async fn untimed_blink_runs_until_stopped() {
        let led = Arc::new(RecordingLed::default());
        let runtime = IndicatorRuntime::new(led.clone(), &fast_config());

        runtime.blink_for(LedState::BlinkFast, None).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runtime.snapshot().await.state(), LedState::BlinkFast);

        runtime.stop_blinking().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.snapshot().await.state(), LedState::On);
        assert_eq!(led.last(), Some((LedState::On, true)));
    }

    #[tokio::test]
    async fn shutdown_drives_led_off() {
        let led = Arc::new(RecordingLed::default());
        let runtime = IndicatorRuntime::new(led.clone(), &fast_config());
        runtime.blink_for(LedState::DoubleBlink, None).await;

        runtime.shutdown().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(runtime.snapshot().await.state(), LedState::Off);
        assert_eq!(led.last(), Some((LedState::Off, false)));
    }
}
