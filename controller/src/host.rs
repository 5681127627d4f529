use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use dimmer_common::{
    apply_actions, cmd_topic, hostname_topic, lwt_topic,
    ports::{MemoryStore, StoredValue},
    slider_cmd_filter, start_time_topic, state_topic, version_topic, Command, DimmerStatus,
    DutyEngine, DutyOutput, EngineAction, HardwareVariant, RuntimeConfig, SettingsStore,
    LWT_OFFLINE, LWT_ONLINE,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const TICK_INTERVAL_MS: u64 = 20;
const STATE_PUBLISH_INTERVAL_SECS: u64 = 10;

#[derive(Clone)]
struct AppState {
    core: Arc<Mutex<Core>>,
    mqtt: AsyncClient,
    topic_root: Arc<String>,
    hostname: Arc<String>,
    started_at: Arc<String>,
    variant: HardwareVariant,
    store: AppStore,
    state_changed: Arc<Notify>,
}

/// Everything the scheduler mutates. One lock, so each event runs to
/// completion before the next one is looked at.
struct Core {
    engine: DutyEngine,
    pwm: SimulatedPwm,
    settings: SettingsFile,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    settings_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

/// Stand-in for the LEDC outputs: remembers and logs every duty write.
#[derive(Debug, Default)]
struct SimulatedPwm {
    duties: Vec<u32>,
}

/// Key/value settings mirrored to a JSON file.
#[derive(Debug, Default)]
struct SettingsFile {
    values: MemoryStore,
    unsaved: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: DimmerStatus,
    variant: &'static str,
    hostname: String,
    version: &'static str,
    #[serde(rename = "startTime")]
    start_time: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    if let Ok(variant) = std::env::var("DIMMER_VARIANT") {
        match variant.parse::<HardwareVariant>() {
            Ok(variant) => runtime.variant = variant,
            Err(err) => warn!("ignoring DIMMER_VARIANT: {err}"),
        }
    }
    runtime.sanitize();

    let engine_config = runtime.engine_config();
    engine_config
        .validate()
        .context("invalid engine configuration")?;

    let settings = store.load_settings().await.unwrap_or_else(|err| {
        warn!("failed to load settings from store: {err:#}");
        SettingsFile::default()
    });

    let engine = DutyEngine::restore(engine_config, &settings);
    let mut core = Core {
        pwm: SimulatedPwm::new(engine.channel_count()),
        engine,
        settings,
    };
    // Outputs exist before the first write; push the restored state once.
    let boot = core.engine.boot_actions();
    core.apply(&boot);
    info!(
        "{} variant with {} channel(s), power {}",
        runtime.variant.as_str(),
        core.engine.channel_count(),
        if core.engine.get_power() { "on" } else { "off" }
    );

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let topic_root = runtime.network.mqtt_topic.clone();
    let mut mqtt_options = MqttOptions::new(runtime.network.hostname.clone(), mqtt_host, mqtt_port);
    mqtt_options.set_last_will(LastWill::new(
        lwt_topic(&topic_root),
        LWT_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        core: Arc::new(Mutex::new(core)),
        mqtt,
        topic_root: Arc::new(topic_root),
        hostname: Arc::new(runtime.network.hostname.clone()),
        started_at: Arc::new(chrono::Local::now().format("%FT%T").to_string()),
        variant: runtime.variant,
        store,
        state_changed: Arc::new(Notify::new()),
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/slider", post(handle_set_slider))
        .route("/api/power", post(handle_set_power))
        .route("/api/power/toggle", post(handle_toggle_power))
        .route("/change", post(handle_change_form))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("DIMMER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dimmer server at {addr}"))?;

    info!("dimmer listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// The request queue only drains while the event loop reaches the broker;
// every call below must fail fast instead of waiting for room.
fn subscribe_topics(mqtt: &AsyncClient, root: &str) -> anyhow::Result<()> {
    for topic in [cmd_topic(root), slider_cmd_filter(root)] {
        mqtt.try_subscribe(topic, QoS::AtMostOnce)?;
    }
    Ok(())
}

fn announce(app_state: &AppState) -> anyhow::Result<()> {
    let root = app_state.topic_root.as_str();
    let mqtt = &app_state.mqtt;

    mqtt.try_publish(lwt_topic(root), QoS::AtLeastOnce, true, LWT_ONLINE)?;
    mqtt.try_publish(
        hostname_topic(root),
        QoS::AtLeastOnce,
        false,
        app_state.hostname.as_bytes().to_vec(),
    )?;
    mqtt.try_publish(version_topic(root), QoS::AtLeastOnce, false, VERSION)?;
    mqtt.try_publish(
        start_time_topic(root),
        QoS::AtLeastOnce,
        false,
        app_state.started_at.as_bytes().to_vec(),
    )?;
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_mqtt_message(&app_state, &message.topic, &message.payload).await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = subscribe_topics(&app_state.mqtt, &app_state.topic_root) {
                        warn!("mqtt subscribe failed: {err:#}");
                    }
                    if let Err(err) = announce(&app_state) {
                        warn!("mqtt announce failed: {err:#}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    });
}

/// Scheduler loop: ticks the engine so stable values reach the settings file.
fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));

        loop {
            interval.tick().await;

            let snapshot = {
                let mut core = app_state.core.lock().await;
                let actions = core.engine.tick(monotonic_ms());
                if actions.is_empty() {
                    continue;
                }
                core.apply(&actions);
                core.settings.take_snapshot()
            };

            if let Some(snapshot) = snapshot {
                if let Err(err) = app_state.store.save_settings(&snapshot).await {
                    // Lost until the value changes again.
                    warn!("failed to persist settings: {err:#}");
                }
            }
        }
    });
}

/// Publishes the state every few seconds and right after each command.
fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(STATE_PUBLISH_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = app_state.state_changed.notified() => {}
            }
            publish_state(&app_state).await;
        }
    });
}

async fn publish_state(app_state: &AppState) {
    let payload = {
        let core = app_state.core.lock().await;
        serde_json::to_vec(&core.engine.state_payload())
    };

    match payload {
        Ok(body) => {
            if let Err(err) = app_state.mqtt.try_publish(
                state_topic(&app_state.topic_root),
                QoS::AtLeastOnce,
                true,
                body,
            ) {
                warn!("dimmer state publish dropped: {err}");
            }
        }
        Err(err) => warn!("dimmer state serialization failed: {err}"),
    }
}

async fn dispatch(app_state: &AppState, command: Command) {
    {
        let mut core = app_state.core.lock().await;
        let actions = command.apply(&mut core.engine, monotonic_ms());
        core.apply(&actions);
    }
    app_state.state_changed.notify_one();
}

async fn handle_mqtt_message(app_state: &AppState, topic: &str, payload: &[u8]) {
    match Command::from_mqtt(&app_state.topic_root, topic, payload) {
        Ok(command) => {
            info!("execute mqtt command {command:?}");
            dispatch(app_state, command).await;
        }
        Err(err) => warn!("ignore mqtt {topic}: {err}"),
    }
}

async fn build_status(state: &AppState) -> StatusResponse {
    let status = state.core.lock().await.engine.status();
    StatusResponse {
        status,
        variant: state.variant.as_str(),
        hostname: state.hostname.as_ref().clone(),
        version: VERSION,
        start_time: state.started_at.as_ref().clone(),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(build_status(&state).await)
}

async fn handle_set_slider(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(channel) = params.get("channel") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'channel' parameter");
    };
    let Ok(channel) = channel.parse::<usize>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid channel index");
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(value) = value.trim().parse::<i32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value (0-1000)");
    };

    let channel_count = state.core.lock().await.engine.channel_count();
    if channel >= channel_count {
        return error_response(StatusCode::BAD_REQUEST, "Unknown channel");
    }

    dispatch(&state, Command::SetValue { channel, value }).await;
    Json(build_status(&state).await).into_response()
}

async fn handle_set_power(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let command = match Command::from_field("power", value) {
        Ok(command) => command,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid power value. Use 'on', 'off' or 'toggle'",
            )
        }
    };

    dispatch(&state, command).await;
    Json(build_status(&state).await).into_response()
}

async fn handle_toggle_power(State(state): State<AppState>) -> impl IntoResponse {
    dispatch(&state, Command::TogglePower).await;
    Json(build_status(&state).await)
}

/// Form posts from the slider page (`slider1=420`, `button=...`).
async fn handle_change_form(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    for (name, value) in &fields {
        if name == "button" {
            info!("button '{value}' pressed");
            continue;
        }
        match Command::from_field(name, value) {
            Ok(command) => {
                debug!("web command {command:?}");
                dispatch(&state, command).await;
            }
            Err(err) => warn!("ignore form field {name}: {err}"),
        }
    }
    Redirect::to("/")
}

impl Core {
    fn apply(&mut self, actions: &[EngineAction]) {
        apply_actions(actions, &mut self.pwm, &mut self.settings);
    }
}

impl SimulatedPwm {
    fn new(channels: usize) -> Self {
        Self {
            duties: vec![0; channels],
        }
    }
}

impl DutyOutput for SimulatedPwm {
    fn write_duty(&mut self, channel: usize, duty: u32) {
        let Some(slot) = self.duties.get_mut(channel) else {
            warn!("pwm write to unknown channel {channel}");
            return;
        };
        if *slot != duty {
            debug!("pwm channel {channel} duty {duty}");
        }
        *slot = duty;
    }
}

impl SettingsFile {
    fn from_json(raw: &[u8]) -> anyhow::Result<Self> {
        let map: Map<String, Value> = serde_json::from_slice(raw)?;
        let mut values = MemoryStore::new();
        for (key, value) in map {
            match value {
                Value::Bool(flag) => values.insert(&key, StoredValue::Bool(flag)),
                Value::Number(number) => {
                    let Some(int) = number.as_i64().and_then(|n| i32::try_from(n).ok()) else {
                        warn!("ignoring non-integer setting {key}");
                        continue;
                    };
                    values.insert(&key, StoredValue::Int(int));
                }
                _ => warn!("ignoring unsupported setting {key}"),
            }
        }
        Ok(Self {
            values,
            unsaved: false,
        })
    }

    fn to_json(&self) -> Map<String, Value> {
        self.values
            .entries()
            .map(|(key, value)| {
                let value = match value {
                    StoredValue::Int(int) => Value::from(int),
                    StoredValue::Bool(flag) => Value::Bool(flag),
                };
                (key.to_string(), value)
            })
            .collect()
    }

    /// Returns the contents to write when something changed since the last
    /// snapshot.
    fn take_snapshot(&mut self) -> Option<Map<String, Value>> {
        if !self.unsaved {
            return None;
        }
        self.unsaved = false;
        Some(self.to_json())
    }
}

impl SettingsStore for SettingsFile {
    fn get_int(&self, key: &str, default: i32) -> i32 {
        self.values.get_int(key, default)
    }

    fn put_int(&mut self, key: &str, value: i32) {
        info!("persist {key}={value}");
        self.values.put_int(key, value);
        self.unsaved = true;
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values.get_bool(key, default)
    }

    fn put_bool(&mut self, key: &str, value: bool) {
        info!("persist {key}={value}");
        self.values.put_bool(key, value);
        self.unsaved = true;
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("DIMMER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.dimmer"));
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            settings_path: Arc::new(data_dir.join("settings.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_settings(&self) -> anyhow::Result<SettingsFile> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.settings_path.as_ref()).await {
            Ok(raw) => SettingsFile::from_json(&raw)
                .with_context(|| format!("corrupt {}", self.settings_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_settings(&self, settings: &Map<String, Value>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.settings_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(settings)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Milliseconds since start, wrapping like the MCU tick counter.
fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}

#[cfg(test)]
mod tests {
    use axum::http::header;
    use dimmer_common::{DutyCurve, EngineConfig, POWER_KEY};

    use super::*;

    const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

    /// App state whose broker never answers: the event loop is kept alive
    /// but never polled, so the request queue only fills up.
    fn offline_state(variant: HardwareVariant) -> (AppState, rumqttc::EventLoop) {
        let options = MqttOptions::new("dimmer-test", "127.0.0.1", 1);
        let (mqtt, eventloop) = AsyncClient::new(options, 4);
        let state = AppState {
            core: Arc::new(Mutex::new(core_for(variant, SettingsFile::default()))),
            mqtt,
            topic_root: Arc::new("dimmer".to_string()),
            hostname: Arc::new("test-dimmer".to_string()),
            started_at: Arc::new("2026-01-01T00:00:00".to_string()),
            variant,
            store: AppStore::in_dir(std::env::temp_dir().join("dimmer-host-tests")),
            state_changed: Arc::new(Notify::new()),
        };
        (state, eventloop)
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn core_for(variant: HardwareVariant, settings: SettingsFile) -> Core {
        let engine = DutyEngine::restore(EngineConfig::for_variant(variant), &settings);
        Core {
            pwm: SimulatedPwm::new(engine.channel_count()),
            engine,
            settings,
        }
    }

    #[test]
    fn settings_json_keeps_ints_and_bools() {
        let raw = br#"{"slider1": 700, "slider2": 1.5, "on": false, "name": "desk"}"#;
        let settings = SettingsFile::from_json(raw).unwrap();

        assert_eq!(settings.get_int("slider1", 250), 700);
        assert_eq!(settings.get_int("slider2", 250), 250);
        assert!(!settings.get_bool(POWER_KEY, true));
        assert_eq!(settings.values.get("name"), None);
    }

    #[test]
    fn snapshot_only_after_writes() {
        let mut settings = SettingsFile::default();
        assert!(settings.take_snapshot().is_none());

        settings.put_int("slider1", 42);
        let snapshot = settings.take_snapshot().unwrap();
        assert_eq!(snapshot.get("slider1"), Some(&Value::from(42)));
        assert!(settings.take_snapshot().is_none());
    }

    #[test]
    fn core_routes_writes_to_pwm_and_settings() {
        let mut core = core_for(HardwareVariant::Rgb, SettingsFile::default());
        let boot = core.engine.boot_actions();
        core.apply(&boot);
        assert_eq!(core.pwm.duties, vec![63, 63, 63]);

        let actions = Command::SetValue {
            channel: 1,
            value: 1000,
        }
        .apply(&mut core.engine, 100);
        core.apply(&actions);
        assert_eq!(core.pwm.duties, vec![63, 1023, 63]);
        assert!(core.settings.take_snapshot().is_none());

        let actions = core.engine.tick(1_101);
        core.apply(&actions);
        let snapshot = core.settings.take_snapshot().unwrap();
        assert_eq!(snapshot.get("slider2"), Some(&Value::from(1000)));
    }

    #[test]
    fn pwm_ignores_unknown_channel() {
        let mut pwm = SimulatedPwm::new(1);
        pwm.write_duty(3, 100);
        assert_eq!(pwm.duties, vec![0]);
    }

    #[tokio::test]
    async fn settings_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::in_dir(dir.path().to_path_buf());

        let mut settings = store.load_settings().await.unwrap();
        settings.put_int("slider1", 900);
        settings.put_bool(POWER_KEY, false);
        let snapshot = settings.take_snapshot().unwrap();
        store.save_settings(&snapshot).await.unwrap();

        let core = core_for(HardwareVariant::White, store.load_settings().await.unwrap());
        assert_eq!(core.engine.get_value(0), Some(900));
        assert!(!core.engine.get_power());
    }

    #[tokio::test]
    async fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::in_dir(dir.path().join("nested"));

        let runtime = store.load_runtime_config().await.unwrap();
        assert_eq!(runtime.variant, HardwareVariant::White);
        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings.get_int("slider1", 250), 250);
    }

    #[tokio::test]
    async fn commands_keep_working_while_broker_is_unreachable() {
        let (state, _eventloop) = offline_state(HardwareVariant::Rgb);

        for round in 0..200 {
            let value = (round * 5).to_string();
            let response = tokio::time::timeout(
                REPLY_TIMEOUT,
                handle_set_slider(
                    State(state.clone()),
                    Query(params(&[("channel", "0"), ("value", &value)])),
                ),
            )
            .await
            .expect("slider request waited on the broker")
            .into_response();
            assert_eq!(response.status(), StatusCode::OK);

            tokio::time::timeout(REPLY_TIMEOUT, publish_state(&state))
                .await
                .expect("state publish waited on the broker");
        }

        assert_eq!(state.core.lock().await.engine.get_value(0), Some(995));
    }

    #[tokio::test]
    async fn announce_fails_fast_on_a_full_queue() {
        let (state, _eventloop) = offline_state(HardwareVariant::White);

        assert!(announce(&state).is_ok());
        assert!(announce(&state).is_err());
        assert!(subscribe_topics(&state.mqtt, &state.topic_root).is_err());
    }

    #[tokio::test]
    async fn slider_rejects_bad_parameters() {
        let (state, _eventloop) = offline_state(HardwareVariant::Rgb);
        let cases = [
            (vec![("value", "10")], "Missing 'channel' parameter"),
            (vec![("channel", "x"), ("value", "10")], "Invalid channel index"),
            (vec![("channel", "0")], "Missing 'value' parameter"),
            (vec![("channel", "0"), ("value", "ten")], "Invalid value (0-1000)"),
            (vec![("channel", "3"), ("value", "10")], "Unknown channel"),
        ];

        for (query, message) in cases {
            let response = handle_set_slider(State(state.clone()), Query(params(&query)))
                .await
                .into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["error"], message);
        }
        assert_eq!(state.core.lock().await.engine.get_value(0), Some(250));
    }

    #[tokio::test]
    async fn slider_sets_value_and_ignores_out_of_range() {
        let (state, _eventloop) = offline_state(HardwareVariant::Rgb);

        let response = handle_set_slider(
            State(state.clone()),
            Query(params(&[("channel", "1"), ("value", "700")])),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["channels"][1]["value"], 700);
        assert_eq!(status["variant"], "rgb");

        let response = handle_set_slider(
            State(state.clone()),
            Query(params(&[("channel", "1"), ("value", "1001")])),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["channels"][1]["value"], 700);
    }

    #[tokio::test]
    async fn power_endpoints() {
        let (state, _eventloop) = offline_state(HardwareVariant::White);

        let response = handle_set_power(State(state.clone()), Query(params(&[])))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_set_power(State(state.clone()), Query(params(&[("value", "dim")])))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "Invalid power value. Use 'on', 'off' or 'toggle'"
        );

        let response = handle_set_power(State(state.clone()), Query(params(&[("value", "off")])))
            .await
            .into_response();
        assert_eq!(body_json(response).await["power"], false);
        assert_eq!(state.core.lock().await.pwm.duties, vec![0]);

        let response = handle_toggle_power(State(state.clone())).await.into_response();
        assert_eq!(body_json(response).await["power"], true);
    }

    #[tokio::test]
    async fn change_form_applies_sliders_and_skips_buttons() {
        let (state, _eventloop) = offline_state(HardwareVariant::Rgb);
        let fields = params(&[("slider2", "600"), ("button", "reset"), ("bogus", "1")]);

        let response = handle_change_form(State(state.clone()), Form(fields))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        {
            let core = state.core.lock().await;
            assert_eq!(core.engine.get_value(0), Some(250));
            assert_eq!(core.engine.get_value(1), Some(600));
            assert_eq!(core.pwm.duties[1], DutyCurve::Quadratic.map(600, 1023));
        }

        tokio::time::timeout(REPLY_TIMEOUT, state.state_changed.notified())
            .await
            .expect("command did not schedule a state publish");
    }
}
