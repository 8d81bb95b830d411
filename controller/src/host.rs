use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::NaiveDateTime;
use perfektday_common::{
    engine::clock_reply, minutes_since_midnight, ButtonEvent, ControllerConfig, EngineAction,
    Indicator, LedState, PerfektDayEngine, PersistedSettings, PushTicket, Reply, Response,
    SessionState, UpdateGuard, TOPIC_BUTTON_PAIRING, TOPIC_BUTTON_REVIEW,
    TOPIC_CONTROLLER_STATE,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    clock::{ClockError, ClockSetter, SystemClock},
    gateway::{push_body, ActuatorGateway, DeconzGateway},
    indicator::{IndicatorRuntime, LedOutput, MqttLed},
    store::{apply_env_overrides, AppStore},
    transport::{self, FrameSink, SessionLimits},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Arc<Mutex<PerfektDayEngine>>,
    gateway: Arc<dyn ActuatorGateway>,
    clock: Arc<dyn ClockSetter>,
    indicator: IndicatorRuntime,
    config: Arc<ControllerConfig>,
    persist: Arc<watch::Sender<PersistedSettings>>,
    review_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    settings: PersistedSettings,
    session: SessionState,
    guard: UpdateGuard,
    indicator: Indicator,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let mut config = store.load_controller_config().await.unwrap_or_else(|err| {
        warn!("failed to load controller config: {err}");
        ControllerConfig::default()
    });
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.sanitize();

    let settings = store.load_settings().await;

    let mut mqtt_options =
        MqttOptions::new("perfektday-controller", config.mqtt.host.clone(), config.mqtt.port);
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(config.mqtt.user.clone(), config.mqtt.pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let gateway = DeconzGateway::new(&config.gateway).context("failed to build gateway client")?;
    let led = Arc::new(MqttLed::new(mqtt.clone()));

    let app_state = AppState::new(
        config,
        settings,
        Arc::new(gateway),
        Arc::new(SystemClock),
        led,
    );
    spawn_persist_loop(&app_state, store.clone());

    app_state.indicator.start().await;
    if app_state.config.gateway.flash_on_boot {
        let identify = app_state.gateway.set_attribute("alert", "select".into()).await;
        if let Err(err) = identify {
            warn!("boot identify flash failed: {err}");
        }
    }

    subscribe_topics(&mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_state_publish_loop(app_state.clone(), mqtt);
    spawn_scheduler_loop(app_state.clone());

    let transport_addr = app_state.config.transport.listen.clone();
    let transport_listener = TcpListener::bind(&transport_addr)
        .await
        .with_context(|| format!("failed to bind transport at {transport_addr}"))?;
    info!("transport listening on {transport_addr}");
    tokio::spawn(transport::serve(
        transport_listener,
        Arc::new(app_state.clone()),
        SessionLimits::from(&app_state.config.transport),
    ));

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .with_state(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], app_state.config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status api listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state.clone()))
        .await?;

    let settings = app_state.persist.borrow().clone();
    if let Err(err) = store.save_settings(&settings).await {
        warn!("final settings flush failed: {err}");
    }
    info!("controller stopped");
    Ok(())
}

impl AppState {
    pub(crate) fn new(
        config: ControllerConfig,
        settings: PersistedSettings,
        gateway: Arc<dyn ActuatorGateway>,
        clock: Arc<dyn ClockSetter>,
        led: Arc<dyn LedOutput>,
    ) -> Self {
        let (persist, _) = watch::channel(settings.clone());
        let indicator = IndicatorRuntime::new(led, &config.indicator);
        Self {
            engine: Arc::new(Mutex::new(PerfektDayEngine::new(settings, config.perfekt_light))),
            gateway,
            clock,
            indicator,
            config: Arc::new(config),
            persist: Arc::new(persist),
            review_task: Arc::new(Mutex::new(None)),
        }
    }

    fn minutes_now(&self) -> u16 {
        minutes_since_midnight(&self.clock.now())
    }

    async fn status(&self) -> StatusView {
        let (settings, session, guard) = {
            let engine = self.engine.lock().await;
            (
                engine.settings().clone(),
                engine.session().clone(),
                engine.guard().clone(),
            )
        };
        StatusView {
            settings,
            session,
            guard,
            indicator: self.indicator.snapshot().await,
        }
    }
}

#[async_trait]
impl FrameSink for AppState {
    async fn set_connected(&self, connected: bool) {
        self.engine.lock().await.set_client_connected(connected);
    }

    async fn on_frame(&self, frame: &str) -> Response {
        let now = self.clock.now();
        let outcome = { self.engine.lock().await.handle_frame(frame, &now) };
        execute_actions(self, outcome.actions).await;

        match outcome.reply {
            Reply::Ready(response) => response,
            Reply::ReadBack(field) => clock_reply(field, &self.clock.now()),
        }
    }
}

/// Persistence runs off the command path; only the newest document is written.
fn spawn_persist_loop(app_state: &AppState, store: AppStore) {
    let mut updates = app_state.persist.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let settings = updates.borrow_and_update().clone();
            if let Err(err) = store.save_settings(&settings).await {
                warn!("failed to persist settings: {err}");
            }
        }
    });
}

async fn execute_actions(app_state: &AppState, actions: Vec<EngineAction>) {
    for action in actions {
        match action {
            EngineAction::Persist(settings) => {
                app_state.persist.send_replace(settings);
            }
            EngineAction::Push(ticket) => spawn_push(app_state, ticket),
            EngineAction::SetClock(target) => set_clock(app_state, target).await,
            EngineAction::Refresh => {
                let minutes = app_state.minutes_now();
                let pushes = { app_state.engine.lock().await.refresh(minutes) };
                for action in pushes {
                    if let EngineAction::Push(ticket) = action {
                        spawn_push(app_state, ticket);
                    }
                }
            }
            EngineAction::CancelReview => cancel_review(app_state).await,
        }
    }
}

fn spawn_push(app_state: &AppState, ticket: PushTicket) {
    let app_state = app_state.clone();
    tokio::spawn(async move { run_push(app_state, ticket).await });
}

/// Writes `ticket` and then any push parked behind it. The guard is released
/// whether or not the gateway accepted the write.
async fn run_push(app_state: AppState, mut ticket: PushTicket) {
    loop {
        let range = { app_state.engine.lock().await.cct_range() };
        let mired = range.code_to_mired(ticket.target.cct);

        match app_state.gateway.set_raw(push_body(mired, ticket.target.dim)).await {
            Ok(()) => debug!(
                "pushed cct {} ({mired} mired) dim {}",
                ticket.target.cct, ticket.target.dim
            ),
            Err(err) => warn!("push to gateway failed: {err}"),
        }

        let next = { app_state.engine.lock().await.complete_push(ticket) };
        match next {
            Some(parked) => ticket = parked,
            None => return,
        }
    }
}

async fn set_clock(app_state: &AppState, target: NaiveDateTime) {
    if !app_state.config.clock.apply {
        info!("clock apply disabled, not setting clock to {target}");
        return;
    }

    let timeout_ms = app_state.config.clock.readback_timeout_ms;
    let result = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        app_state.clock.set(target),
    )
    .await
    .unwrap_or(Err(ClockError::Timeout(timeout_ms)));

    match result {
        Ok(()) => info!("system clock set to {target}"),
        Err(err) => warn!("failed to set system clock: {err}"),
    }
}

async fn handle_button(app_state: &AppState, event: ButtonEvent) {
    match event {
        ButtonEvent::Pairing => {
            let window = app_state.config.indicator.pairing_window_secs;
            if let Err(err) = app_state.gateway.enable_pairing(window).await {
                warn!("failed to open gateway pairing window: {err}");
            }
            app_state
                .indicator
                .blink_for(
                    LedState::BlinkSlow,
                    Some(Duration::from_secs(window as u64)),
                )
                .await;
        }
        ButtonEvent::CycleReview => start_cycle_review(app_state).await,
    }
}

async fn start_cycle_review(app_state: &AppState) {
    let indicator_config = &app_state.config.indicator;
    let review = {
        app_state.engine.lock().await.begin_review(
            indicator_config.review_margin_minutes,
            indicator_config.review_step_minutes,
        )
    };
    app_state.indicator.blink_for(LedState::BlinkFast, None).await;
    info!("cycle review started");

    let task_state = app_state.clone();
    let step = Duration::from_millis(indicator_config.review_step_interval_ms);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(step);
        for minute in review {
            interval.tick().await;
            let Some(actions) = task_state.engine.lock().await.review_step(minute) else {
                return;
            };
            execute_actions(&task_state, actions).await;
        }

        if task_state.engine.lock().await.finish_review() {
            task_state.indicator.set_steady(true).await;
            task_state.indicator.stop_blinking().await;
            info!("cycle review finished");
        }
    });

    if let Some(previous) = app_state.review_task.lock().await.replace(handle) {
        previous.abort();
    }
}

async fn cancel_review(app_state: &AppState) {
    if let Some(task) = app_state.review_task.lock().await.take() {
        task.abort();
    }
    app_state.indicator.stop_blinking().await;
    info!("cycle review cancelled");
}

fn spawn_scheduler_loop(app_state: AppState) {
    tokio::spawn(async move {
        let tick = Duration::from_millis(app_state.config.scheduler.tick_interval_ms);
        let mut interval = tokio::time::interval(tick);

        loop {
            interval.tick().await;
            scheduler_tick(&app_state).await;
        }
    });
}

async fn scheduler_tick(app_state: &AppState) {
    let ready = {
        let engine = app_state.engine.lock().await;
        engine.is_perfekt_day() && !engine.guard().is_in_flight()
    };
    if !ready {
        return;
    }

    let (ct, bri) = tokio::join!(
        app_state.gateway.get_attribute("ct"),
        app_state.gateway.get_attribute("bri"),
    );
    let mired = ct
        .map_err(|err| debug!("ct read-back failed: {err}"))
        .ok();
    let bri = bri
        .map_err(|err| debug!("bri read-back failed: {err}"))
        .ok()
        .and_then(|value| u8::try_from(value).ok());

    let minutes = app_state.minutes_now();
    let actions = {
        let mut engine = app_state.engine.lock().await;
        engine.reconcile(mired, bri);
        engine.tick(minutes)
    };
    execute_actions(app_state, actions).await;
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_BUTTON_PAIRING, TOPIC_BUTTON_REVIEW] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized MQTT payload on topic {} ({} bytes)",
                            message.topic,
                            message.payload.len()
                        );
                        continue;
                    }
                    if let Some(event) = button_event(&message.topic) {
                        info!("button {event:?}");
                        handle_button(&app_state, event).await;
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn button_event(topic: &str) -> Option<ButtonEvent> {
    match topic {
        TOPIC_BUTTON_PAIRING => Some(ButtonEvent::Pairing),
        TOPIC_BUTTON_REVIEW => Some(ButtonEvent::CycleReview),
        _ => None,
    }
}

fn spawn_state_publish_loop(app_state: AppState, mqtt: AsyncClient) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            interval.tick().await;

            match serde_json::to_vec(&app_state.status().await) {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status().await)
}

async fn shutdown_signal(app_state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");

    if let Some(task) = app_state.review_task.lock().await.take() {
        task.abort();
    }
    app_state.engine.lock().await.abort_review();
    app_state.indicator.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::NaiveDate;
    use perfektday_common::{config::IndicatorConfig, schedule_for};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::{gateway::GatewayError, indicator::tests::RecordingLed};

    #[derive(Default)]
    struct FakeGateway {
        writes: StdMutex<Vec<Value>>,
        pairing: StdMutex<Vec<u16>>,
    }

    impl FakeGateway {
        fn writes(&self) -> Vec<Value> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActuatorGateway for FakeGateway {
        async fn set_raw(&self, body: Value) -> Result<(), GatewayError> {
            self.writes.lock().unwrap().push(body);
            Ok(())
        }

        async fn get_attribute(&self, name: &str) -> Result<u16, GatewayError> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find_map(|body| body.get(name).and_then(Value::as_u64))
                .map(|value| value as u16)
                .ok_or_else(|| GatewayError::MissingAttribute(name.to_string()))
        }

        async fn enable_pairing(&self, duration_secs: u16) -> Result<(), GatewayError> {
            self.pairing.lock().unwrap().push(duration_secs);
            Ok(())
        }
    }

    struct FakeClock {
        now: StdMutex<NaiveDateTime>,
        sets: StdMutex<Vec<NaiveDateTime>>,
    }

    impl FakeClock {
        fn at(now: NaiveDateTime) -> Self {
            Self {
                now: StdMutex::new(now),
                sets: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClockSetter for FakeClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }

        async fn set(&self, target: NaiveDateTime) -> Result<(), ClockError> {
            self.sets.lock().unwrap().push(target);
            *self.now.lock().unwrap() = target;
            Ok(())
        }
    }

    struct Harness {
        state: AppState,
        gateway: Arc<FakeGateway>,
        clock: Arc<FakeClock>,
        led: Arc<RecordingLed>,
    }

    fn harness() -> Harness {
        let now = NaiveDate::from_ymd_opt(2031, 7, 4)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let clock = Arc::new(FakeClock::at(now));
        let led = Arc::new(RecordingLed::default());
        let config = ControllerConfig {
            indicator: IndicatorConfig {
                review_step_interval_ms: 5,
                review_step_minutes: 240,
                review_margin_minutes: 0,
                slow_blink_period_ms: 40,
                fast_blink_period_ms: 20,
                ..IndicatorConfig::default()
            },
            ..ControllerConfig::default()
        };

        Harness {
            state: AppState::new(
                config,
                PersistedSettings::default(),
                gateway.clone(),
                clock.clone(),
                led.clone(),
            ),
            gateway,
            clock,
            led,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn color_override_pushes_mired_and_brightness_together() {
        let h = harness();

        let reply = h.state.on_frame("CTS 200\n").await;
        settle().await;

        assert_eq!(reply.to_string(), "CT;200");
        assert_eq!(h.gateway.writes(), vec![json!({ "ct": 176, "bri": 255 })]);
        assert!(!h.state.engine.lock().await.guard().is_in_flight());
    }

    #[tokio::test]
    async fn year_sync_sets_clock_then_reads_date_back() {
        let h = harness();

        let reply = h.state.on_frame("RYS 24\n").await;

        let expected = NaiveDate::from_ymd_opt(2024, 7, 4)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap();
        assert_eq!(h.clock.sets.lock().unwrap().as_slice(), [expected]);
        assert_eq!(reply.to_string(), "RD;07/04");
    }

    #[tokio::test]
    async fn out_of_range_year_leaves_clock_alone() {
        let h = harness();

        let reply = h.state.on_frame("RYS 124\n").await;

        assert!(h.clock.sets.lock().unwrap().is_empty());
        assert_eq!(reply.to_string(), "RD;07/04");
    }

    #[tokio::test]
    async fn settings_change_reaches_the_persist_channel() {
        let h = harness();
        let mut updates = h.state.persist.subscribe();

        h.state.on_frame("NCS 42\n").await;

        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().night_cct, 42);
    }

    #[tokio::test]
    async fn scheduler_tick_pushes_once_per_change() {
        let h = harness();
        let (target, range) = {
            let engine = h.state.engine.lock().await;
            (
                schedule_for(h.state.minutes_now(), engine.settings()),
                engine.cct_range(),
            )
        };
        assert_ne!(range.mired_to_code(range.code_to_mired(target.cct)), target.cct);

        for _ in 0..3 {
            scheduler_tick(&h.state).await;
            settle().await;
        }

        assert_eq!(
            h.gateway.writes(),
            vec![json!({ "ct": range.code_to_mired(target.cct), "bri": target.dim })]
        );
        assert_eq!(
            h.state.engine.lock().await.guard().last_pushed(),
            (Some(target.cct), Some(target.dim))
        );
    }

    #[tokio::test]
    async fn scheduler_tick_rewrites_a_group_changed_elsewhere() {
        let h = harness();
        scheduler_tick(&h.state).await;
        settle().await;

        h.gateway
            .writes
            .lock()
            .unwrap()
            .push(json!({ "ct": 370, "bri": 12 }));
        scheduler_tick(&h.state).await;
        settle().await;

        let writes = h.gateway.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[2], writes[0]);
    }

    #[tokio::test]
    async fn pairing_button_opens_window_and_blinks() {
        let h = harness();

        handle_button(&h.state, ButtonEvent::Pairing).await;
        settle().await;

        assert_eq!(h.gateway.pairing.lock().unwrap().as_slice(), [60]);
        assert_eq!(h.state.indicator.snapshot().await.state(), LedState::BlinkSlow);
    }

    #[tokio::test]
    async fn cycle_review_sweeps_and_restores_automatic_mode() {
        let h = harness();

        handle_button(&h.state, ButtonEvent::CycleReview).await;
        assert!(!h.state.engine.lock().await.is_perfekt_day());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.state.engine.lock().await.is_perfekt_day());
        assert!(!h.gateway.writes().is_empty());
        assert_eq!(h.state.indicator.snapshot().await.state(), LedState::On);
        assert_eq!(h.led.last(), Some((LedState::On, true)));
    }

    #[tokio::test]
    async fn manual_override_cancels_cycle_review() {
        let h = harness();
        {
            let mut engine = h.state.engine.lock().await;
            engine.begin_review(0, 1);
        }
        h.state.indicator.blink_for(LedState::BlinkFast, None).await;

        h.state.on_frame("DLS 10\n").await;
        settle().await;

        let engine = h.state.engine.lock().await;
        assert!(!engine.session().review_active);
        assert!(!engine.is_perfekt_day());
        drop(engine);
        assert_eq!(h.state.indicator.snapshot().await.state(), LedState::On);
    }

    #[tokio::test]
    async fn client_connection_is_reflected_in_status() {
        let h = harness();

        h.state.set_connected(true).await;

        let status = serde_json::to_value(h.state.status().await).unwrap();
        assert_eq!(status["session"]["clientConnected"], true);
        assert_eq!(status["indicator"]["ledState"], "ON");
    }
}
