use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use dimmer_common::{
    apply_actions, cmd_topic, config::NetworkConfig, hostname_topic, lwt_topic, parse_form,
    slider_cmd_filter, start_time_topic, state_topic, version_topic, ButtonDebouncer, Command,
    DimmerStatus, DutyEngine, DutyOutput, EngineAction, HardwareConfig, LinkAction,
    LinkSupervisor, RuntimeConfig, SettingsStore, LWT_OFFLINE, LWT_ONLINE,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NVS_NAMESPACE: &str = "dimmer";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const MAX_HTTP_BODY: usize = 1024;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const CONTROL_LOOP_SLEEP_MS: u64 = 3;
const STATE_PUBLISH_INTERVAL_MS: u32 = 10_000;
const RESTART_DELAY_MS: u64 = 500;
const LED_FAST_BLINK_MS: u32 = 200;
const LED_SLOW_BLINK_MS: u32 = 900;

const INDEX_HTML: &str = include_str!("../web/index.html");
const APP_JS: &str = include_str!("../web/app.js");
const STYLE_CSS: &str = include_str!("../web/style.css");

#[derive(Clone)]
struct SharedState {
    core: Arc<Mutex<Core>>,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
    topic_root: Arc<String>,
    hostname: Arc<String>,
    started_at: Arc<String>,
    variant: &'static str,
    mqtt_connected: Arc<AtomicBool>,
    publish_pending: Arc<AtomicBool>,
}

/// What the MQTT receiver hands to the control loop. The receiver never
/// calls back into the client while it holds an event.
enum MqttInbound {
    Connected,
    Disconnected,
    Command(Command),
}

struct Core {
    engine: DutyEngine,
    pwm: LedcOutputs,
    settings: NvsSettings,
}

/// One LEDC channel per logical channel, all on timer 0.
struct LedcOutputs {
    drivers: Vec<LedcDriver<'static>>,
}

/// Dimmer values and the power flag as plain NVS entries.
struct NvsSettings {
    nvs: EspNvs<NvsDefault>,
}

struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    lit: bool,
}

struct PowerButton {
    pin: PinDriver<'static, AnyIOPin, Input>,
    debouncer: ButtonDebouncer,
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

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let settings = NvsSettings::open(nvs_partition.clone())?;

    let mut runtime = settings.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);

    let engine_config = runtime.engine_config();
    engine_config
        .validate()
        .context("invalid engine configuration")?;

    let Peripherals { modem, ledc, .. } = Peripherals::take()?;

    let timer = Arc::new(LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig::default()
            .frequency(runtime.hardware.pwm_frequency_hz.Hz().into())
            .resolution(resolution_for_bits(runtime.variant.resolution_bits())),
    )?);

    // Outputs must exist before the restored state is written to them.
    let count = engine_config.channel_count;
    let hardware = &runtime.hardware;
    let mut drivers = Vec::with_capacity(count);
    if count > 0 {
        drivers.push(LedcDriver::new(ledc.channel0, timer.clone(), pwm_pin(hardware, 0)?)?);
    }
    if count > 1 {
        drivers.push(LedcDriver::new(ledc.channel1, timer.clone(), pwm_pin(hardware, 1)?)?);
    }
    if count > 2 {
        drivers.push(LedcDriver::new(ledc.channel2, timer.clone(), pwm_pin(hardware, 2)?)?);
    }
    if count > 3 {
        drivers.push(LedcDriver::new(ledc.channel3, timer.clone(), pwm_pin(hardware, 3)?)?);
    }
    info!(
        "LEDC ready: {} channel(s) @ {}Hz, {} bit",
        drivers.len(),
        hardware.pwm_frequency_hz,
        runtime.variant.resolution_bits()
    );

    let engine = DutyEngine::restore(engine_config, &settings);
    let mut core = Core {
        engine,
        pwm: LedcOutputs { drivers },
        settings,
    };
    let boot = core.engine.boot_actions();
    core.apply(&boot);

    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &runtime.network) {
        Ok(wifi) => Some(wifi),
        Err(err) => {
            // The button keeps working without a network.
            warn!("wifi unavailable, running offline: {err:#}");
            None
        }
    };
    let supervise_wifi = wifi.is_some();

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let topic_root = runtime.network.mqtt_topic.clone();
    let (mqtt_client, mqtt_conn) = create_mqtt_client(&runtime.network, &topic_root)?;

    let shared_state = SharedState {
        core: Arc::new(Mutex::new(core)),
        mqtt: Arc::new(Mutex::new(mqtt_client)),
        topic_root: Arc::new(topic_root),
        hostname: Arc::new(runtime.network.hostname.clone()),
        started_at: Arc::new(chrono::Utc::now().format("%FT%T").to_string()),
        variant: runtime.variant.as_str(),
        mqtt_connected: Arc::new(AtomicBool::new(false)),
        publish_pending: Arc::new(AtomicBool::new(true)),
    };

    let (inbound_tx, inbound_rx) = mpsc::channel();
    spawn_mqtt_receiver(shared_state.topic_root.clone(), mqtt_conn, inbound_tx)?;
    spawn_control_loop(
        shared_state.clone(),
        inbound_rx,
        supervise_wifi,
        init_power_button(runtime.hardware.button_pin),
        init_status_led(runtime.hardware.status_led_pin),
    )?;

    let server = create_http_server(shared_state)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn resolution_for_bits(bits: u8) -> Resolution {
    match bits {
        8 => Resolution::Bits8,
        11 => Resolution::Bits11,
        12 => Resolution::Bits12,
        _ => Resolution::Bits10,
    }
}

fn pwm_pin(hardware: &HardwareConfig, channel: usize) -> anyhow::Result<AnyOutputPin> {
    let pin = hardware
        .pwm_pins
        .get(channel)
        .copied()
        .ok_or_else(|| anyhow!("no PWM pin configured for channel {channel}"))?;
    Ok(unsafe { AnyOutputPin::new(pin) })
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_ok_response()?.write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/app.js", Method::Get, move |req| {
        req.into_ok_response()?.write_all(APP_JS.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/style.css", Method::Get, move |req| {
        req.into_ok_response()?.write_all(STYLE_CSS.as_bytes())?;
        Ok(())
    })?;

    {
        let state = state.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let status = build_status(&state);
            write_json(req, &status)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/slider", Method::Post, move |req| {
            let uri = req.uri().to_string();
            let Some(channel) =
                query_param(&uri, "channel").and_then(|value| value.parse::<usize>().ok())
            else {
                return write_error(req, 400, "Missing or invalid 'channel' parameter");
            };
            let Some(value) =
                query_param(&uri, "value").and_then(|value| value.trim().parse::<i32>().ok())
            else {
                return write_error(req, 400, "Missing or invalid 'value' parameter");
            };
            if channel >= lock(&state.core).engine.channel_count() {
                return write_error(req, 400, "Unknown channel");
            }

            dispatch(&state, Command::SetValue { channel, value });
            let status = build_status(&state);
            write_json(req, &status)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/power", Method::Post, move |req| {
            let uri = req.uri().to_string();
            let Some(value) = query_param(&uri, "value") else {
                return write_error(req, 400, "Missing 'value' parameter");
            };
            let Ok(command) = Command::from_field("power", &value) else {
                return write_error(req, 400, "Invalid power value. Use 'on', 'off' or 'toggle'");
            };

            dispatch(&state, command);
            let status = build_status(&state);
            write_json(req, &status)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/power/toggle", Method::Post, move |req| {
            dispatch(&state, Command::TogglePower);
            let status = build_status(&state);
            write_json(req, &status)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/change", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let body = String::from_utf8_lossy(&body);
            for (name, value) in parse_form(&body) {
                if name == "button" {
                    info!("button '{value}' pressed");
                    continue;
                }
                match Command::from_field(&name, &value) {
                    Ok(command) => dispatch(&state, command),
                    Err(err) => warn!("ignore form field {name}: {err}"),
                }
            }
            req.into_response(303, Some("See Other"), &[("Location", "/")])?;
            Ok(())
        })?;
    }

    for path in ["/api/restart", "/reset"] {
        server.fn_handler(path, Method::Post, move |req| {
            warn!("restart requested over http");
            schedule_restart();
            let payload = serde_json::json!({ "restarting": true });
            write_json(req, &payload)
        })?;
    }

    Ok(server)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    parse_form(query)
        .into_iter()
        .find_map(|(name, value)| (name == key).then_some(value))
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    if let Some(err) = last_err {
        // The driver stays started; the control loop keeps reconnecting.
        warn!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {err:#}");
    }
    Ok(esp_wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
    topic_root: &str,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);
    let lwt_topic = lwt_topic(topic_root);

    let conf = MqttClientConfiguration {
        client_id: Some(network.hostname.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        lwt: Some(LwtConfiguration {
            topic: lwt_topic.as_str(),
            payload: LWT_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_topics(state: &SharedState) -> anyhow::Result<()> {
    let mut mqtt = lock(&state.mqtt);
    for topic in [cmd_topic(&state.topic_root), slider_cmd_filter(&state.topic_root)] {
        mqtt.subscribe(&topic, QoS::AtMostOnce)?;
    }
    Ok(())
}

fn announce(state: &SharedState) -> anyhow::Result<()> {
    let root = state.topic_root.as_str();
    let mut mqtt = lock(&state.mqtt);
    mqtt.publish(&lwt_topic(root), QoS::AtLeastOnce, true, LWT_ONLINE.as_bytes())?;
    mqtt.publish(&hostname_topic(root), QoS::AtLeastOnce, false, state.hostname.as_bytes())?;
    mqtt.publish(&version_topic(root), QoS::AtLeastOnce, false, VERSION.as_bytes())?;
    mqtt.publish(
        &start_time_topic(root),
        QoS::AtLeastOnce,
        false,
        state.started_at.as_bytes(),
    )?;
    Ok(())
}

fn spawn_mqtt_receiver(
    topic_root: Arc<String>,
    mut conn: EspMqttConnection,
    inbound: Sender<MqttInbound>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            let message = match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        Some(MqttInbound::Connected)
                    }
                    EventPayload::Disconnected => Some(MqttInbound::Disconnected),
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // Only full payloads are commands.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        match Command::from_mqtt(&topic_root, topic, data) {
                            Ok(command) => Some(MqttInbound::Command(command)),
                            Err(err) => {
                                warn!("ignore mqtt {topic}: {err}");
                                None
                            }
                        }
                    }
                    _ => None,
                },
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                    Some(MqttInbound::Disconnected)
                }
            };

            if let Some(message) = message {
                if inbound.send(message).is_err() {
                    warn!("control loop gone, stopping mqtt receiver");
                    return;
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;
    Ok(())
}

fn spawn_control_loop(
    state: SharedState,
    inbound: Receiver<MqttInbound>,
    supervise_wifi: bool,
    mut button: Option<PowerButton>,
    mut status_led: Option<StatusLed>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let mut last_state_publish_ms = 0_u32;
            let mut link = LinkSupervisor::new();

            loop {
                feed_watchdog();
                let now_ms = monotonic_ms();
                let wifi_connected = is_wifi_station_connected();
                update_status_led(
                    &mut status_led,
                    wifi_connected,
                    state.mqtt_connected.load(Ordering::Relaxed),
                    now_ms,
                );

                if supervise_wifi {
                    match link.poll(now_ms, wifi_connected) {
                        LinkAction::Idle => {}
                        LinkAction::Reconnect => reconnect_wifi(link.attempts()),
                        LinkAction::Restart => {
                            warn!(
                                "wifi still down after {} attempts, restarting",
                                link.attempts() - 1
                            );
                            restart_now();
                        }
                    }
                }

                while let Ok(message) = inbound.try_recv() {
                    handle_inbound(&state, message);
                }

                let pressed = button.as_mut().and_then(|button| {
                    let raw = button.pin.is_low();
                    button.debouncer.sample(now_ms, raw)
                });
                if let Some(pressed) = pressed {
                    let mut core = lock(&state.core);
                    let (toggled, actions) = core.engine.set_power(pressed, now_ms);
                    core.apply(&actions);
                    if toggled {
                        state.publish_pending.store(true, Ordering::Relaxed);
                    }
                }

                {
                    let mut core = lock(&state.core);
                    let actions = core.engine.tick(now_ms);
                    core.apply(&actions);
                }

                let periodic =
                    now_ms.wrapping_sub(last_state_publish_ms) >= STATE_PUBLISH_INTERVAL_MS;
                if state.publish_pending.swap(false, Ordering::Relaxed) || periodic {
                    last_state_publish_ms = now_ms;
                    publish_state(&state);
                }

                thread::sleep(Duration::from_millis(CONTROL_LOOP_SLEEP_MS));
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

/// Runs on the control loop, never on the MQTT event thread.
fn handle_inbound(state: &SharedState, message: MqttInbound) {
    match message {
        MqttInbound::Connected => {
            state.mqtt_connected.store(true, Ordering::Relaxed);
            if let Err(err) = subscribe_topics(state) {
                warn!("mqtt subscribe failed: {err:#}");
            }
            if let Err(err) = announce(state) {
                warn!("mqtt announce failed: {err:#}");
            }
            state.publish_pending.store(true, Ordering::Relaxed);
        }
        MqttInbound::Disconnected => {
            state.mqtt_connected.store(false, Ordering::Relaxed);
        }
        MqttInbound::Command(command) => {
            info!("execute mqtt command {command:?}");
            dispatch(state, command);
        }
    }
}

/// Applies a command and leaves the state publish to the control loop.
fn dispatch(state: &SharedState, command: Command) {
    let mut core = lock(&state.core);
    let actions = command.apply(&mut core.engine, monotonic_ms());
    core.apply(&actions);
    state.publish_pending.store(true, Ordering::Relaxed);
}

fn publish_state(state: &SharedState) {
    let payload = serde_json::to_vec(&lock(&state.core).engine.state_payload());
    let result = payload.map_err(anyhow::Error::from).and_then(|body| {
        lock(&state.mqtt)
            .publish(&state_topic(&state.topic_root), QoS::AtLeastOnce, true, &body)
            .map(|_| ())
            .map_err(anyhow::Error::from)
    });
    if let Err(err) = result {
        warn!("state publish failed: {err:#}");
    }
}

fn reconnect_wifi(attempt: u32) {
    info!("wifi down, reconnect attempt {attempt}");
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_connect() };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("esp_wifi_connect returned {rc}");
    }
}

fn restart_now() {
    unsafe { esp_idf_svc::sys::esp_restart() };
}

/// Gives the HTTP response time to leave before the chip resets.
fn schedule_restart() {
    let spawned = thread::Builder::new()
        .name("restart".into())
        .stack_size(4 * 1024)
        .spawn(|| {
            thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
            restart_now();
        });
    if let Err(err) = spawned {
        warn!("failed to spawn restart thread: {err}");
    }
}

fn build_status(state: &SharedState) -> StatusResponse {
    StatusResponse {
        status: lock(&state.core).engine.status(),
        variant: state.variant,
        hostname: state.hostname.as_ref().clone(),
        version: VERSION,
        start_time: state.started_at.as_ref().clone(),
    }
}

impl Core {
    fn apply(&mut self, actions: &[EngineAction]) {
        apply_actions(actions, &mut self.pwm, &mut self.settings);
    }
}

impl DutyOutput for LedcOutputs {
    fn write_duty(&mut self, channel: usize, duty: u32) {
        let Some(driver) = self.drivers.get_mut(channel) else {
            warn!("pwm write to unknown channel {channel}");
            return;
        };
        if let Err(err) = driver.set_duty(duty) {
            warn!("failed to set duty {duty} on channel {channel}: {err}");
        }
    }
}

impl NvsSettings {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let mut buffer = vec![0_u8; 1024];
        match self.nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

impl SettingsStore for NvsSettings {
    fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.nvs.get_i32(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                warn!("nvs read {key} failed: {err}");
                default
            }
        }
    }

    fn put_int(&mut self, key: &str, value: i32) {
        info!("persist {key}={value}");
        if let Err(err) = self.nvs.set_i32(key, value) {
            warn!("nvs write {key} failed: {err}");
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.nvs.get_u8(key) {
            Ok(Some(value)) => value != 0,
            Ok(None) => default,
            Err(err) => {
                warn!("nvs read {key} failed: {err}");
                default
            }
        }
    }

    fn put_bool(&mut self, key: &str, value: bool) {
        info!("persist {key}={value}");
        if let Err(err) = self.nvs.set_u8(key, u8::from(value)) {
            warn!("nvs write {key} failed: {err}");
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

/// Push button to ground with the internal pull-up.
fn init_power_button(pin: i32) -> Option<PowerButton> {
    let driver = unsafe { PinDriver::input(AnyIOPin::new(pin)) };
    match driver {
        Ok(mut driver) => {
            if let Err(err) = driver.set_pull(Pull::Up) {
                warn!("button pull-up unavailable on GPIO{pin}: {err}");
            }
            Some(PowerButton {
                pin: driver,
                debouncer: ButtonDebouncer::new(),
            })
        }
        Err(err) => {
            warn!("power button unavailable on GPIO{pin}: {err}");
            None
        }
    }
}

fn init_status_led(pin: i32) -> Option<StatusLed> {
    if pin < 0 {
        return None;
    }
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) };
    match driver {
        Ok(mut pin) => {
            let _ = pin.set_low();
            Some(StatusLed { pin, lit: false })
        }
        Err(err) => {
            warn!("status LED unavailable on GPIO{pin}: {err}");
            None
        }
    }
}

fn update_status_led(
    status_led: &mut Option<StatusLed>,
    wifi_connected: bool,
    mqtt_connected: bool,
    now_ms: u32,
) {
    let desired_on = if !wifi_connected {
        ((now_ms / LED_FAST_BLINK_MS) % 2) == 0
    } else if !mqtt_connected {
        ((now_ms / LED_SLOW_BLINK_MS) % 2) == 0
    } else {
        true
    };

    let Some(led) = status_led.as_mut() else {
        return;
    };

    if desired_on == led.lit {
        return;
    }

    let result = if desired_on {
        led.pin.set_high()
    } else {
        led.pin.set_low()
    };

    if let Err(err) = result {
        warn!("failed to drive status LED: {err}");
    } else {
        led.lit = desired_on;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Milliseconds since boot, wrapping after ~49 days.
fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}
