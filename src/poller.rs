//! Continuous telemetry polling
//!
//! The poller does not own a timer. The application calls [TelemetryPoller::tick] every
//! [PollerSettings::interval] and hands the returned snapshot to its display layer.
//!
//! Once the OBD adapter is gone the poller stays [PollerState::Disconnected] and reports safe
//! defaults until a new one is built from a fresh discovery pass.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::Arc,
    time::{Duration, Instant},
};

use strum::IntoEnumIterator;

use crate::{
    nmea::GpsSpeedReader,
    obd2::{
        celsius_to_fahrenheit, elm327::Elm327, enhanced::GM_OIL_PRESSURE, round_to, ObdCommand, ObdQuery,
        ObdResponse, ObdValue, Time, ABSOLUTE_LOAD, ACCELERATOR_POS_D, BAROMETRIC_PRESSURE, CONTROL_MODULE_VOLTAGE,
        COOLANT_TEMP, ENGINE_LOAD, FUEL_LEVEL, FUEL_TYPE, INTAKE_PRESSURE, INTAKE_TEMP, RPM, RUN_TIME, STATUS,
        THROTTLE_POS,
    },
    probe::Discovery,
};

/// Values published to the dashboard
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display, strum_macros::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "snake_case"))]
pub enum Metric {
    /// GPS ground speed, whole mph
    Speed,
    /// Engine speed
    Rpm,
    /// Coolant temperature, °F to one decimal
    CoolantTemp,
    /// Control module (battery) voltage, one decimal
    ControlModuleVoltage,
    /// Calculated engine load, %
    EngineLoad,
    /// Throttle position, %
    ThrottlePosition,
    /// Intake manifold pressure, kPa
    IntakePressure,
    /// Intake air temperature, °C
    IntakeTemp,
    /// Absolute load, %
    AbsoluteLoad,
    /// Fuel level, whole %
    FuelLevel,
    /// Barometric pressure, kPa
    BarometricPressure,
    /// Accelerator pedal position D, %
    AcceleratorPosition,
    /// Engine run time, `HH:MM:SS`
    Runtime,
    /// Fuel type name
    FuelType,
    /// Engine oil pressure (GM Mode 22), psi
    OilPressure,
    /// Check engine light
    Mil,
    /// Stored DTC count
    DtcCount,
}

impl Metric {
    /// Command the metric is read with. Speed comes from the GPS, and [Metric::Mil] and
    /// [Metric::DtcCount] share the status request.
    pub fn command(&self) -> Option<ObdCommand> {
        Some(match self {
            Metric::Speed => return None,
            Metric::Rpm => RPM,
            Metric::CoolantTemp => COOLANT_TEMP,
            Metric::ControlModuleVoltage => CONTROL_MODULE_VOLTAGE,
            Metric::EngineLoad => ENGINE_LOAD,
            Metric::ThrottlePosition => THROTTLE_POS,
            Metric::IntakePressure => INTAKE_PRESSURE,
            Metric::IntakeTemp => INTAKE_TEMP,
            Metric::AbsoluteLoad => ABSOLUTE_LOAD,
            Metric::FuelLevel => FUEL_LEVEL,
            Metric::BarometricPressure => BAROMETRIC_PRESSURE,
            Metric::AcceleratorPosition => ACCELERATOR_POS_D,
            Metric::Runtime => RUN_TIME,
            Metric::FuelType => FUEL_TYPE,
            Metric::OilPressure => GM_OIL_PRESSURE,
            Metric::Mil | Metric::DtcCount => STATUS,
        })
    }

    /// Value shown when nothing could be read
    pub fn default_value(&self) -> MetricValue {
        match self {
            Metric::Runtime => MetricValue::Text(Time::from_seconds(0.0).to_elapsed_string()),
            Metric::FuelType => MetricValue::Text(String::new()),
            Metric::Mil => MetricValue::Flag(false),
            _ => MetricValue::Number(0.0),
        }
    }

    /// Converts a decoded response into the form shown on the dashboard
    fn present(&self, value: &ObdValue) -> Option<MetricValue> {
        let number = || value.as_f64();
        Some(match self {
            Metric::CoolantTemp => MetricValue::Number(round_to(celsius_to_fahrenheit(number()?), 1)),
            Metric::ControlModuleVoltage => MetricValue::Number(round_to(number()?, 1)),
            Metric::FuelLevel => MetricValue::Number(round_to(number()?, 0)),
            Metric::Runtime => MetricValue::Text(Time::from_seconds(number()?).to_elapsed_string()),
            Metric::FuelType => MetricValue::Text(value.as_text()?.to_string()),
            Metric::Mil => MetricValue::Flag(value.as_status()?.mil),
            Metric::DtcCount => MetricValue::Number(value.as_status()?.dtc_count as f64),
            _ => MetricValue::Number(number()?),
        })
    }

    fn reading(&self, response: &ObdResponse) -> MetricReading {
        response
            .value
            .as_ref()
            .and_then(|v| self.present(v))
            .map(MetricReading::fresh)
            .unwrap_or_else(|| MetricReading::stale(self.default_value()))
    }
}

/// A metric value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(untagged))]
pub enum MetricValue {
    /// Gauge value
    Number(f64),
    /// Label text
    Text(String),
    /// Indicator lamp
    Flag(bool),
}

impl Display for MetricValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{n}"),
            MetricValue::Text(t) => write!(f, "{t}"),
            MetricValue::Flag(b) => write!(f, "{b}"),
        }
    }
}

/// A metric value and whether it was read this tick
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricReading {
    /// Value
    pub value: MetricValue,
    /// True if this is a default or held value rather than a fresh reading
    pub stale: bool,
}

impl MetricReading {
    /// Fresh reading
    pub fn fresh(value: MetricValue) -> Self {
        Self { value, stale: false }
    }

    /// Default or held value
    pub fn stale(value: MetricValue) -> Self {
        Self { value, stale: true }
    }
}

/// Poller state
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PollerState {
    /// OBD adapter answering, metrics are read every tick
    Connected,
    /// No usable OBD adapter, metrics are safe defaults
    #[default]
    Disconnected,
}

/// What the fault indicators show while disconnected
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisconnectFaultPolicy {
    /// MIL off, no DTCs
    Clear,
    /// MIL on with a fixed DTC count, so a lost link is never mistaken for a clean bill of health
    Sentinel {
        /// DTC count to show
        dtc_count: u8,
    },
}

impl Default for DisconnectFaultPolicy {
    fn default() -> Self {
        Self::Sentinel { dtc_count: 10 }
    }
}

impl DisconnectFaultPolicy {
    fn mil(&self) -> bool {
        matches!(self, Self::Sentinel { .. })
    }

    fn dtc_count(&self) -> u8 {
        match self {
            Self::Clear => 0,
            Self::Sentinel { dtc_count } => *dtc_count,
        }
    }
}

/// Settings for [TelemetryPoller]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct PollerSettings {
    /// Time between ticks. Fixed, the poller never adapts it
    pub interval: Duration,
    /// Fault indicators while disconnected
    pub fault_policy: DisconnectFaultPolicy,
    /// Metrics that rarely change (fuel type) are read every this many ticks
    pub slow_poll_every: u32,
    /// Read GM oil pressure over Mode 22
    pub enhanced_oil_pressure: bool,
    /// How long the last GPS speed is held (marked stale) when a tick sees no new sentence.
    /// Zero reports 0 mph on any tick without a valid fix
    pub gps_hold: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            fault_policy: DisconnectFaultPolicy::default(),
            slow_poll_every: 25,
            enhanced_oil_pressure: true,
            gps_hold: Duration::ZERO,
        }
    }
}

/// Every metric at one point in time
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySnapshot {
    sequence: u64,
    state: PollerState,
    values: BTreeMap<Metric, MetricReading>,
}

impl TelemetrySnapshot {
    /// Snapshot with every metric at its disconnected default
    pub fn disconnected(sequence: u64, policy: DisconnectFaultPolicy) -> Self {
        let values = Metric::iter()
            .map(|m| (m, disconnected_reading(m, policy)))
            .collect();
        Self {
            sequence,
            state: PollerState::Disconnected,
            values,
        }
    }

    /// Tick this snapshot was produced by. 0 before the first tick
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Poller state when the snapshot was taken
    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Reading of a metric
    pub fn get(&self, metric: Metric) -> Option<&MetricReading> {
        self.values.get(&metric)
    }

    /// Numeric value of a metric, 0 if it is not a number
    pub fn number(&self, metric: Metric) -> f64 {
        match self.get(metric).map(|r| &r.value) {
            Some(MetricValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    /// Text of a metric, empty if it is not text
    pub fn text(&self, metric: Metric) -> &str {
        match self.get(metric).map(|r| &r.value) {
            Some(MetricValue::Text(t)) => t,
            _ => "",
        }
    }

    /// Flag value of a metric, false if it is not a flag
    pub fn flag(&self, metric: Metric) -> bool {
        matches!(self.get(metric).map(|r| &r.value), Some(MetricValue::Flag(true)))
    }

    /// True if the metric was not freshly read
    pub fn is_stale(&self, metric: Metric) -> bool {
        self.get(metric).is_none_or(|r| r.stale)
    }

    /// Every reading, in [Metric] order
    pub fn iter(&self) -> impl Iterator<Item = (Metric, &MetricReading)> {
        self.values.iter().map(|(m, r)| (*m, r))
    }

    /// Readings without the sequence number, for comparing snapshots across ticks
    pub fn values(&self) -> &BTreeMap<Metric, MetricReading> {
        &self.values
    }
}

fn disconnected_reading(metric: Metric, policy: DisconnectFaultPolicy) -> MetricReading {
    let value = match metric {
        Metric::Mil => MetricValue::Flag(policy.mil()),
        Metric::DtcCount => MetricValue::Number(policy.dtc_count() as f64),
        m => m.default_value(),
    };
    MetricReading::stale(value)
}

/// Polls the OBD adapter and GPS receiver and publishes [TelemetrySnapshot]s
pub struct TelemetryPoller {
    obd: Option<Elm327>,
    gps: Option<GpsSpeedReader>,
    settings: PollerSettings,
    state: PollerState,
    latest: Arc<TelemetrySnapshot>,
    fuel_type: Option<MetricReading>,
    last_speed: Option<(f64, Instant)>,
}

impl std::fmt::Debug for TelemetryPoller {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPoller")
            .field("obd", &self.obd)
            .field("gps", &self.gps)
            .field("state", &self.state)
            .field("sequence", &self.latest.sequence)
            .finish()
    }
}

impl TelemetryPoller {
    /// Creates a poller. It starts [PollerState::Connected] only if the adapter reached a vehicle
    pub fn new(obd: Option<Elm327>, gps: Option<GpsSpeedReader>, settings: PollerSettings) -> Self {
        let state = match &obd {
            Some(elm) if elm.is_car_connected() => PollerState::Connected,
            Some(elm) => {
                log::warn!("Adapter on {} has no vehicle ({}), polling disabled", elm.path(), elm.status());
                PollerState::Disconnected
            }
            None => PollerState::Disconnected,
        };
        let latest = Arc::new(TelemetrySnapshot::disconnected(0, settings.fault_policy));
        Self {
            obd,
            gps,
            settings,
            state,
            latest,
            fuel_type: None,
            last_speed: None,
        }
    }

    /// Creates a poller from whatever a discovery pass found
    pub fn from_discovery(discovery: Discovery, settings: PollerSettings) -> Self {
        Self::new(discovery.obd.ok(), discovery.gps.ok(), settings)
    }

    /// Current state
    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Tick interval the caller should keep to
    pub fn interval(&self) -> Duration {
        self.settings.interval
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Arc<TelemetrySnapshot> {
        self.latest.clone()
    }

    /// Reads every metric once and publishes the result
    pub fn tick(&mut self) -> Arc<TelemetrySnapshot> {
        let sequence = self.latest.sequence + 1;
        let mut values = BTreeMap::new();
        if self.state == PollerState::Connected {
            self.poll_obd(sequence, &mut values);
        }
        let policy = self.settings.fault_policy;
        for metric in Metric::iter() {
            values
                .entry(metric)
                .or_insert_with(|| disconnected_reading(metric, policy));
        }
        values.insert(Metric::Speed, self.poll_gps());

        let snapshot = Arc::new(TelemetrySnapshot {
            sequence,
            state: self.state,
            values,
        });
        self.latest = snapshot.clone();
        snapshot
    }

    /// Closes both ports. Every later tick reports defaults
    pub fn shutdown(&mut self) {
        self.drop_obd(None);
        if let Some(mut gps) = self.gps.take() {
            if let Err(e) = gps.close() {
                log::debug!("Closing GPS port failed: {e}");
            }
        }
        self.last_speed = None;
    }

    fn poll_obd(&mut self, sequence: u64, values: &mut BTreeMap<Metric, MetricReading>) {
        let Some(elm) = self.obd.as_mut() else {
            return;
        };
        let slow_every = u64::from(self.settings.slow_poll_every.max(1));
        let refresh_slow = self.fuel_type.is_none() || sequence % slow_every == 0;
        let mut lost = false;

        for metric in Metric::iter() {
            match metric {
                Metric::Speed | Metric::DtcCount => continue,
                Metric::FuelType if !refresh_slow => {
                    if let Some(cached) = &self.fuel_type {
                        values.insert(metric, cached.clone());
                        continue;
                    }
                }
                Metric::OilPressure if !self.settings.enhanced_oil_pressure => {
                    values.insert(metric, MetricReading::stale(metric.default_value()));
                    continue;
                }
                _ => {}
            }
            let Some(cmd) = metric.command() else {
                continue;
            };
            let response = elm.query(&cmd);
            values.insert(metric, metric.reading(&response));
            match metric {
                Metric::Mil => {
                    values.insert(Metric::DtcCount, Metric::DtcCount.reading(&response));
                }
                Metric::FuelType => self.fuel_type = Some(metric.reading(&response)),
                _ => {}
            }
            if elm.is_lost() {
                lost = true;
                break;
            }
        }

        if lost {
            // Whatever was read before the port died is discarded
            values.clear();
            self.drop_obd(Some("port lost"));
        }
    }

    fn poll_gps(&mut self) -> MetricReading {
        let Some(gps) = self.gps.as_mut() else {
            return MetricReading::stale(Metric::Speed.default_value());
        };
        if let Some(fix) = gps.poll() {
            let mph = fix.display_mph();
            self.last_speed = Some((mph, Instant::now()));
            return MetricReading::fresh(MetricValue::Number(mph));
        }
        if gps.is_lost() {
            log::warn!("GPS receiver on {} lost", gps.path());
            if let Err(e) = gps.close() {
                log::debug!("Closing GPS port failed: {e}");
            }
            self.gps = None;
            self.last_speed = None;
        }
        match self.last_speed {
            Some((mph, at)) if !self.settings.gps_hold.is_zero() && at.elapsed() <= self.settings.gps_hold => {
                MetricReading::stale(MetricValue::Number(mph))
            }
            _ => MetricReading::stale(Metric::Speed.default_value()),
        }
    }

    fn drop_obd(&mut self, failure: Option<&str>) {
        if let Some(mut elm) = self.obd.take() {
            if let Some(reason) = failure {
                log::warn!("OBD adapter on {} disconnected: {reason}", elm.path());
            }
            if let Err(e) = elm.close() {
                log::debug!("Closing OBD port failed: {e}");
            }
        }
        self.state = PollerState::Disconnected;
        self.fuel_type = None;
    }
}

impl Drop for TelemetryPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obd2::{NullReason, MonitorStatus, Unit};

    fn response(value: ObdValue) -> ObdResponse {
        ObdResponse {
            command: "TEST",
            raw_bytes: Vec::new(),
            ecu_source: None,
            value: Some(value),
            null_reason: None,
        }
    }

    #[test]
    fn presentation_rounding() {
        let r = Metric::CoolantTemp.reading(&response(ObdValue::quantity(83.0, Unit::Celsius)));
        assert_eq!(r, MetricReading::fresh(MetricValue::Number(181.4)));

        let r = Metric::ControlModuleVoltage.reading(&response(ObdValue::quantity(14.012, Unit::Volts)));
        assert_eq!(r.value, MetricValue::Number(14.0));

        let r = Metric::FuelLevel.reading(&response(ObdValue::quantity(50.196, Unit::Percent)));
        assert_eq!(r.value, MetricValue::Number(50.0));

        let r = Metric::Runtime.reading(&response(ObdValue::quantity(3725.0, Unit::Seconds)));
        assert_eq!(r.value, MetricValue::Text("01:02:05".into()));

        let status = ObdValue::Status(MonitorStatus::from_bytes(0x83, 0x00));
        assert_eq!(Metric::Mil.reading(&response(status.clone())).value, MetricValue::Flag(true));
        assert_eq!(Metric::DtcCount.reading(&response(status)).value, MetricValue::Number(3.0));
    }

    #[test]
    fn null_and_mismatched_values_fall_back_to_defaults() {
        let null = ObdResponse::null("RPM", NullReason::NoData);
        assert_eq!(Metric::Rpm.reading(&null), MetricReading::stale(MetricValue::Number(0.0)));
        assert_eq!(
            Metric::Runtime.reading(&null),
            MetricReading::stale(MetricValue::Text("00:00:00".into()))
        );
        assert_eq!(Metric::FuelType.reading(&null).value, MetricValue::Text(String::new()));

        // Text where a number was expected
        let r = Metric::Rpm.reading(&response(ObdValue::Text("Gasoline".into())));
        assert!(r.stale);
    }

    #[test]
    fn disconnected_snapshot_follows_fault_policy() {
        let s = TelemetrySnapshot::disconnected(3, DisconnectFaultPolicy::default());
        assert!(s.flag(Metric::Mil));
        assert_eq!(s.number(Metric::DtcCount), 10.0);
        assert_eq!(s.number(Metric::Rpm), 0.0);
        assert!(Metric::iter().all(|m| s.is_stale(m)));

        let s = TelemetrySnapshot::disconnected(3, DisconnectFaultPolicy::Clear);
        assert!(!s.flag(Metric::Mil));
        assert_eq!(s.number(Metric::DtcCount), 0.0);
    }

    #[test]
    fn poller_without_devices_reports_defaults() {
        let mut poller = TelemetryPoller::new(None, None, PollerSettings::default());
        assert_eq!(poller.state(), PollerState::Disconnected);
        let expected = TelemetrySnapshot::disconnected(0, DisconnectFaultPolicy::default());
        for i in 1..=5 {
            let s = poller.tick();
            assert_eq!(s.sequence(), i);
            assert_eq!(s.values(), expected.values());
        }
    }

    #[test]
    fn metric_names() {
        assert_eq!(Metric::CoolantTemp.to_string(), "coolant_temp");
        assert_eq!(Metric::Mil.command(), Some(STATUS));
        assert_eq!(Metric::Speed.command(), None);
    }
}
