//! In-process loopback platform.
//!
//! `SimPlatform` keeps databases, tests and sessions in memory and closes
//! every OUT message back onto the IN message with the same id: a value
//! written to an output point reappears on the input point mapped at the same
//! start byte. Generators are sampled when the session stops and the samples
//! become that session's log.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::f64::consts::TAU;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    DataLogger, EndCondition, EngineError, EngineResult, GeneratorEngine, GeneratorHandle, GeneratorSpec, LogRecord,
    MetaColumn, MetaTable, PointEngine, PointValue, RecordSink, SampleSelector, StopMode, StorageEngine, TestEngine,
    TestInfo, Value, Waveform,
};
use crate::topology::message::{Message, MESSAGE_FILE};
use crate::topology::{CvtType, Direction, MappingRecord, PointAttributes, RawType};

/// Status codes returned by the simulator.
pub mod codes {
    pub const NOT_FOUND: i32 = crate::platform::NOT_FOUND;
    pub const ALREADY_EXISTS: i32 = -3;
    pub const NOT_CONNECTED: i32 = -4;
    pub const INVALID_STATE: i32 = -5;
    pub const BAD_ARGUMENT: i32 = -6;
    pub const INJECTED: i32 = -99;
}

const SIM_EPOCH_SECS: i64 = 1_700_000_000;

/// Simulator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the jitter generator.
    pub seed: u64,
    /// Peak uniform noise added to looped-back generator samples.
    pub jitter: f64,
    /// Samples logged per generator when a session stops.
    pub samples_per_run: usize,
    pub sample_period_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            jitter: 0.0,
            samples_per_run: 300,
            sample_period_ms: 10,
        }
    }
}

/// Engine operations, used for fault injection and the call journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    DeleteDatabase,
    CreateDatabase,
    LoadDatabase,
    UpsertItems,
    UpsertMappings,
    SaveDatabase,
    WriteRemoteFile,
    DeleteTest,
    CreateTest,
    CreateSession,
    StartSession,
    StopSession,
    DeleteSession,
    SetValue,
    GetValues,
    AddGenerator,
    StartGenerators,
    Connect,
    SelectProject,
    SelectSession,
    QueryTest,
    MetaTable,
    GetRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Running,
    Stopped,
}

/// Contents of a simulated RTDB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimDatabase {
    pub items: BTreeMap<String, PointAttributes>,
    pub mappings: BTreeMap<String, MappingRecord>,
    /// Remote files keyed by file name.
    pub files: BTreeMap<String, Vec<String>>,
    pub saved: bool,
}

struct SimTest {
    database: String,
    sessions: BTreeMap<String, SimSession>,
}

struct SimSession {
    logging: bool,
    phase: SessionPhase,
}

#[derive(Debug, Clone)]
struct PointInfo {
    cvt: CvtType,
    raw: RawType,
    direction: Direction,
    message: String,
    start_byte: u32,
    string_length: u32,
}

struct ActiveRun {
    test: String,
    session: String,
    logging: bool,
    points: BTreeMap<String, PointInfo>,
    /// Output point -> input point.
    routes: BTreeMap<String, String>,
    values: BTreeMap<String, PointValue>,
    generators: Vec<(String, GeneratorSpec)>,
    generators_started: bool,
}

struct SessionLog {
    columns: Vec<MetaColumn>,
    records: BTreeMap<String, Vec<LogRecord>>,
}

#[derive(Default)]
struct LoggerCursor {
    host: Option<String>,
    project: Option<String>,
    session: Option<String>,
    meta_loaded: bool,
}

struct SimState {
    databases: BTreeMap<String, SimDatabase>,
    current_db: Option<String>,
    tests: BTreeMap<String, SimTest>,
    active: Option<ActiveRun>,
    logs: BTreeMap<String, SessionLog>,
    logger: LoggerCursor,
    faults: HashSet<EngineOp>,
    journal: Vec<EngineOp>,
    next_generator: u32,
    rng: StdRng,
}

fn not_found(kind: &str, name: &str) -> EngineError {
    EngineError::new(codes::NOT_FOUND, format!("{kind} '{name}' not found"))
}

fn invalid_state(message: impl Into<String>) -> EngineError {
    EngineError::new(codes::INVALID_STATE, message)
}

impl SimState {
    fn new(seed: u64) -> Self {
        Self {
            databases: BTreeMap::new(),
            current_db: None,
            tests: BTreeMap::new(),
            active: None,
            logs: BTreeMap::new(),
            logger: LoggerCursor::default(),
            faults: HashSet::new(),
            journal: Vec::new(),
            next_generator: 1,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Journal `op` and fail it if a fault was injected.
    fn enter(&mut self, op: EngineOp) -> EngineResult<()> {
        self.journal.push(op);
        if self.faults.contains(&op) {
            return Err(EngineError::new(codes::INJECTED, format!("injected fault in {op:?}")));
        }
        Ok(())
    }

    fn current_db_mut(&mut self) -> EngineResult<&mut SimDatabase> {
        let name = self
            .current_db
            .clone()
            .ok_or_else(|| invalid_state("no database loaded"))?;
        self.databases
            .get_mut(&name)
            .ok_or_else(|| not_found("database", &name))
    }

    fn active(&self) -> EngineResult<&ActiveRun> {
        self.active
            .as_ref()
            .ok_or_else(|| invalid_state("no session is running"))
    }

    fn active_mut(&mut self) -> EngineResult<&mut ActiveRun> {
        self.active
            .as_mut()
            .ok_or_else(|| invalid_state("no session is running"))
    }

    fn selected_log(&self) -> EngineResult<(&str, &SessionLog)> {
        let path = self
            .logger
            .session
            .as_deref()
            .ok_or_else(|| invalid_state("no session selected"))?;
        let log = self.logs.get(path).ok_or_else(|| not_found("logged session", path))?;
        Ok((path, log))
    }
}

/// Loopback implementation of every engine trait.
pub struct SimPlatform {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimPlatform {
    pub fn new(config: SimConfig) -> Self {
        let state = Mutex::new(SimState::new(config.seed));
        Self { config, state }
    }

    /// Make every subsequent call of `op` fail.
    pub async fn inject_fault(&self, op: EngineOp) {
        self.state.lock().await.faults.insert(op);
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Every operation attempted so far, in call order.
    pub async fn journal(&self) -> Vec<EngineOp> {
        self.state.lock().await.journal.clone()
    }

    pub async fn database(&self, name: &str) -> Option<SimDatabase> {
        self.state.lock().await.databases.get(name).cloned()
    }

    pub async fn current_database(&self) -> Option<String> {
        self.state.lock().await.current_db.clone()
    }

    pub async fn has_test(&self, name: &str) -> bool {
        self.state.lock().await.tests.contains_key(name)
    }

    pub async fn session_phase(&self, test: &str, session: &str) -> Option<SessionPhase> {
        let state = self.state.lock().await;
        state
            .tests
            .get(test)
            .and_then(|t| t.sessions.get(session))
            .map(|s| s.phase)
    }
}

// ---------------------------------------------------------------------------
// Loopback plumbing
// ---------------------------------------------------------------------------

fn point_table(db: &SimDatabase) -> BTreeMap<String, PointInfo> {
    db.items
        .iter()
        .filter_map(|(name, attrs)| {
            let mapping = db.mappings.get(&attrs.mapping_record)?;
            Some((
                name.clone(),
                PointInfo {
                    cvt: attrs.cvt_type,
                    raw: mapping.raw_type,
                    direction: mapping.direction,
                    message: mapping.message.clone(),
                    start_byte: mapping.start_byte,
                    string_length: mapping.string_length,
                },
            ))
        })
        .collect()
}

fn loopback_routes(db: &SimDatabase, points: &BTreeMap<String, PointInfo>) -> BTreeMap<String, String> {
    let messages: Vec<Message> = db
        .files
        .get(MESSAGE_FILE)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| match line.parse::<Message>() {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!(line = %line, error = %e, "skipping malformed message line");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let inbound: HashMap<u32, &str> = messages
        .iter()
        .filter(|m| m.direction == Direction::In)
        .map(|m| (m.id, m.name.as_str()))
        .collect();
    let outbound: HashMap<&str, u32> = messages
        .iter()
        .filter(|m| m.direction == Direction::Out)
        .map(|m| (m.name.as_str(), m.id))
        .collect();

    let mut routes = BTreeMap::new();
    for (name, info) in points.iter().filter(|(_, p)| p.direction == Direction::Out) {
        let Some(id) = outbound.get(info.message.as_str()) else {
            continue;
        };
        let Some(in_msg) = inbound.get(id) else {
            continue;
        };
        let target = points.iter().find(|(_, p)| {
            p.direction == Direction::In && p.message == *in_msg && p.start_byte == info.start_byte
        });
        if let Some((input, _)) = target {
            routes.insert(name.clone(), input.clone());
        }
    }
    routes
}

fn pad_string(s: &str, length: u32) -> String {
    if length == 0 {
        return s.to_string();
    }
    let length = length as usize;
    let mut padded: String = s.chars().take(length).collect();
    let short = length - padded.chars().count();
    padded.extend(std::iter::repeat('\0').take(short));
    padded
}

fn coerce(point: &str, info: &PointInfo, value: &Value) -> EngineResult<Value> {
    match (info.cvt.is_string(), value) {
        (true, Value::Text(s)) => Ok(Value::Text(s.clone())),
        (false, Value::Number(n)) => Ok(Value::Number(info.cvt.quantize(*n))),
        _ => Err(EngineError::new(
            codes::BAD_ARGUMENT,
            format!("value {value} does not fit {} point '{point}'", info.cvt),
        )),
    }
}

fn loop_value(output: &PointInfo, input: &PointInfo, value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(input.cvt.quantize(output.raw.quantize(output.cvt.quantize(*n)))),
        Value::Text(s) => Value::Text(pad_string(s, input.string_length)),
    }
}

fn waveform_value(spec: &GeneratorSpec, t: f64) -> f64 {
    let expired = spec.end == EndCondition::Duration && t >= spec.start_delay + spec.duration;
    if t < spec.start_delay || expired {
        return spec.offset;
    }

    let cycles = spec.frequency * (t - spec.start_delay) + spec.phase / 360.0;
    let frac = cycles - cycles.floor();
    let unit = match spec.waveform {
        Waveform::Sine => (TAU * cycles).sin(),
        Waveform::Triangle => 1.0 - 4.0 * ((frac + 0.25).fract() - 0.5).abs(),
        Waveform::Square => {
            if frac * 100.0 < spec.duty {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * frac - 1.0,
    };
    spec.offset + spec.amplitude * unit
}

fn synthesize_log(config: &SimConfig, run: &ActiveRun, rng: &mut StdRng) -> SessionLog {
    let columns = run
        .points
        .iter()
        .map(|(name, info)| MetaColumn {
            point: name.clone(),
            cvt_type: info.cvt,
            raw_type: info.raw,
        })
        .collect();

    let mut records: BTreeMap<String, Vec<LogRecord>> = BTreeMap::new();
    if !run.generators_started {
        return SessionLog { columns, records };
    }

    let period_secs = config.sample_period_ms as f64 / 1000.0;
    for k in 0..config.samples_per_run {
        let t = k as f64 * period_secs;
        let elapsed_ns = (k as u64)
            .saturating_mul(config.sample_period_ms)
            .saturating_mul(1_000_000);
        let t_sec = SIM_EPOCH_SECS + (elapsed_ns / 1_000_000_000) as i64;
        let t_nsec = (elapsed_ns % 1_000_000_000) as u32;

        let mut push = |point: &str, primary: f64, alternate: f64, raw: f64| {
            records.entry(point.to_string()).or_default().push(LogRecord {
                index: k as u64,
                t_sec,
                t_nsec,
                primary,
                alternate,
                raw,
                dl_flags: 0,
                rt_flags: 0,
            });
        };

        for (point, spec) in &run.generators {
            let Some(info) = run.points.get(point) else {
                continue;
            };
            let ideal = waveform_value(spec, t);
            let wire = info.raw.quantize(info.cvt.quantize(ideal));
            push(point.as_str(), info.cvt.quantize(ideal), ideal, wire);

            let looped = run
                .routes
                .get(point)
                .and_then(|input| run.points.get(input).map(|p| (input, p)));
            if let Some((input, in_info)) = looped {
                let mut value = in_info.cvt.quantize(wire);
                if config.jitter > 0.0 {
                    value += rng.gen_range(-config.jitter..=config.jitter);
                }
                push(input.as_str(), value, value, wire);
            }
        }
    }

    SessionLog { columns, records }
}

// ---------------------------------------------------------------------------
// Engine implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl StorageEngine for SimPlatform {
    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::DeleteDatabase)?;
        state
            .databases
            .remove(name)
            .ok_or_else(|| not_found("database", name))?;
        if state.current_db.as_deref() == Some(name) {
            state.current_db = None;
        }
        Ok(())
    }

    async fn create_database(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::CreateDatabase)?;
        if name.is_empty() {
            return Err(EngineError::new(codes::BAD_ARGUMENT, "database name is empty"));
        }
        state.databases.insert(name.to_string(), SimDatabase::default());
        state.current_db = Some(name.to_string());
        Ok(())
    }

    async fn load_database(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::LoadDatabase)?;
        if !state.databases.contains_key(name) {
            return Err(not_found("database", name));
        }
        state.current_db = Some(name.to_string());
        Ok(())
    }

    async fn upsert_items(&self, items: &BTreeMap<String, PointAttributes>, persist: bool) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::UpsertItems)?;
        let db = state.current_db_mut()?;
        db.items
            .extend(items.iter().map(|(k, v)| (k.clone(), v.clone())));
        if persist {
            db.saved = true;
        }
        Ok(())
    }

    async fn upsert_mapping_records(&self, records: &BTreeMap<String, MappingRecord>) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::UpsertMappings)?;
        let db = state.current_db_mut()?;
        db.mappings
            .extend(records.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn save_database(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::SaveDatabase)?;
        let db = state
            .databases
            .get_mut(name)
            .ok_or_else(|| not_found("database", name))?;
        db.saved = true;
        Ok(())
    }

    async fn write_remote_file(&self, lines: &[String], dir: &str, file: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::WriteRemoteFile)?;
        let db_name = dir.strip_prefix("RTDB/").ok_or_else(|| {
            EngineError::new(codes::BAD_ARGUMENT, format!("remote directory '{dir}' is not an RTDB directory"))
        })?;
        let db = state
            .databases
            .get_mut(db_name)
            .ok_or_else(|| not_found("database", db_name))?;
        db.files.insert(file.to_string(), lines.to_vec());
        debug!(dir, file, lines = lines.len(), "remote file written");
        Ok(())
    }
}

#[async_trait]
impl TestEngine for SimPlatform {
    async fn delete_test(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::DeleteTest)?;
        if state.active.as_ref().is_some_and(|run| run.test == name) {
            return Err(invalid_state(format!("test '{name}' has a running session")));
        }
        state.tests.remove(name).ok_or_else(|| not_found("test", name))?;
        let prefix = format!("{name}/");
        state.logs.retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    async fn create_test(&self, name: &str, database: &str, description: &str, fixed_step_ms: u32) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::CreateTest)?;
        if state.tests.contains_key(name) {
            return Err(EngineError::new(codes::ALREADY_EXISTS, format!("test '{name}' already exists")));
        }
        if !state.databases.contains_key(database) {
            return Err(not_found("database", database));
        }
        state.tests.insert(
            name.to_string(),
            SimTest {
                database: database.to_string(),
                sessions: BTreeMap::new(),
            },
        );
        debug!(test = name, database, description, fixed_step_ms, "test created");
        Ok(())
    }

    async fn create_session(
        &self,
        test: &str,
        session: &str,
        description: &str,
        schedule_type: u32,
        no_logging: bool,
    ) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::CreateSession)?;
        let entry = state.tests.get_mut(test).ok_or_else(|| not_found("test", test))?;
        if entry.sessions.contains_key(session) {
            return Err(EngineError::new(
                codes::ALREADY_EXISTS,
                format!("session '{test}/{session}' already exists"),
            ));
        }
        entry.sessions.insert(
            session.to_string(),
            SimSession {
                logging: !no_logging,
                phase: SessionPhase::Created,
            },
        );
        debug!(test, session, description, schedule_type, no_logging, "session created");
        Ok(())
    }

    async fn start_session(&self, test: &str, session: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::StartSession)?;
        if let Some(run) = &state.active {
            return Err(invalid_state(format!(
                "session '{}/{}' is already running",
                run.test, run.session
            )));
        }

        let entry = state.tests.get(test).ok_or_else(|| not_found("test", test))?;
        let sim_session = entry
            .sessions
            .get(session)
            .ok_or_else(|| not_found("session", session))?;
        if sim_session.phase != SessionPhase::Created {
            return Err(invalid_state(format!("session '{test}/{session}' has already run")));
        }
        let logging = sim_session.logging;
        let db = state
            .databases
            .get(&entry.database)
            .ok_or_else(|| not_found("database", &entry.database))?;

        let points = point_table(db);
        let routes = loopback_routes(db, &points);
        let values = points
            .iter()
            .map(|(name, info)| {
                let zero = if info.cvt.is_string() {
                    Value::Text(String::new())
                } else {
                    Value::Number(0.0)
                };
                (
                    name.clone(),
                    PointValue {
                        value: zero.clone(),
                        alt_value: zero,
                    },
                )
            })
            .collect();

        info!(test, session, points = points.len(), routes = routes.len(), "simulated session running");

        if let Some(s) = state
            .tests
            .get_mut(test)
            .and_then(|t| t.sessions.get_mut(session))
        {
            s.phase = SessionPhase::Running;
        }
        state.logs.remove(&format!("{test}/{session}"));
        state.active = Some(ActiveRun {
            test: test.to_string(),
            session: session.to_string(),
            logging,
            points,
            routes,
            values,
            generators: Vec::new(),
            generators_started: false,
        });
        Ok(())
    }

    async fn stop_session(&self, mode: StopMode) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::StopSession)?;
        let run = state
            .active
            .take()
            .ok_or_else(|| invalid_state("no session is running"))?;

        if let Some(s) = state
            .tests
            .get_mut(&run.test)
            .and_then(|t| t.sessions.get_mut(&run.session))
        {
            s.phase = SessionPhase::Stopped;
        }

        if run.logging {
            let log = synthesize_log(&self.config, &run, &mut state.rng);
            state.logs.insert(format!("{}/{}", run.test, run.session), log);
        }
        info!(test = %run.test, session = %run.session, ?mode, "simulated session stopped");
        Ok(())
    }

    async fn delete_session(&self, test: &str, session: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::DeleteSession)?;
        if state
            .active
            .as_ref()
            .is_some_and(|run| run.test == test && run.session == session)
        {
            return Err(invalid_state(format!("session '{test}/{session}' is running")));
        }
        state
            .tests
            .get_mut(test)
            .and_then(|t| t.sessions.remove(session))
            .ok_or_else(|| not_found("session", &format!("{test}/{session}")))?;
        state.logs.remove(&format!("{test}/{session}"));
        Ok(())
    }
}

#[async_trait]
impl PointEngine for SimPlatform {
    async fn set_value(&self, point: &str, value: Value) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::SetValue)?;
        let run = state.active_mut()?;
        let info = run
            .points
            .get(point)
            .cloned()
            .ok_or_else(|| not_found("point", point))?;

        let stored = coerce(point, &info, &value)?;
        run.values.insert(
            point.to_string(),
            PointValue {
                value: stored,
                alt_value: value.clone(),
            },
        );

        let target = run
            .routes
            .get(point)
            .and_then(|input| run.points.get(input).map(|p| (input.clone(), p.clone())));
        if let Some((input, in_info)) = target {
            let looped = loop_value(&info, &in_info, &value);
            run.values.insert(
                input,
                PointValue {
                    value: looped.clone(),
                    alt_value: looped,
                },
            );
        }
        Ok(())
    }

    async fn get_values(&self, points: &[String]) -> EngineResult<BTreeMap<String, PointValue>> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::GetValues)?;
        let run = state.active()?;
        points
            .iter()
            .map(|p| {
                run.values
                    .get(p)
                    .cloned()
                    .map(|v| (p.clone(), v))
                    .ok_or_else(|| not_found("point", p))
            })
            .collect()
    }
}

#[async_trait]
impl GeneratorEngine for SimPlatform {
    async fn add_generator(&self, point: &str, spec: &GeneratorSpec) -> EngineResult<GeneratorHandle> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::AddGenerator)?;
        let handle = GeneratorHandle(state.next_generator);
        let run = state.active_mut()?;
        let info = run.points.get(point).ok_or_else(|| not_found("point", point))?;
        if info.direction != Direction::Out || info.cvt.is_string() {
            return Err(EngineError::new(
                codes::BAD_ARGUMENT,
                format!("point '{point}' cannot drive a generator"),
            ));
        }
        run.generators.push((point.to_string(), spec.clone()));
        state.next_generator += 1;
        Ok(handle)
    }

    async fn start_all_generators(&self) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::StartGenerators)?;
        let run = state.active_mut()?;
        run.generators_started = true;
        Ok(())
    }
}

#[async_trait]
impl DataLogger for SimPlatform {
    async fn connect(&self, host: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::Connect)?;
        if host.is_empty() {
            return Err(EngineError::new(codes::BAD_ARGUMENT, "logger host is empty"));
        }
        state.logger = LoggerCursor {
            host: Some(host.to_string()),
            ..LoggerCursor::default()
        };
        Ok(())
    }

    async fn select_project(&self, project: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::SelectProject)?;
        if state.logger.host.is_none() {
            return Err(EngineError::new(codes::NOT_CONNECTED, "logger is not connected"));
        }
        state.logger.project = Some(project.to_string());
        state.logger.session = None;
        state.logger.meta_loaded = false;
        Ok(())
    }

    async fn select_session(&self, path: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::SelectSession)?;
        if state.logger.project.is_none() {
            return Err(invalid_state("no project selected"));
        }
        if !state.logs.contains_key(path) {
            return Err(not_found("logged session", path));
        }
        state.logger.session = Some(path.to_string());
        state.logger.meta_loaded = false;
        Ok(())
    }

    async fn query_test(&self) -> EngineResult<TestInfo> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::QueryTest)?;
        let (path, log) = state.selected_log()?;
        let (test, session) = path.split_once('/').unwrap_or((path, ""));
        Ok(TestInfo {
            test: test.to_string(),
            session: session.to_string(),
            record_count: log.records.values().map(|r| r.len() as u64).sum(),
            points: log.records.keys().cloned().collect(),
        })
    }

    async fn meta_table(&self) -> EngineResult<MetaTable> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::MetaTable)?;
        let columns = state.selected_log()?.1.columns.clone();
        state.logger.meta_loaded = true;
        Ok(MetaTable { columns })
    }

    async fn get_records(
        &self,
        point: &str,
        max_records: usize,
        selector: SampleSelector,
        sink: &mut dyn RecordSink,
    ) -> EngineResult<usize> {
        let mut state = self.state.lock().await;
        state.enter(EngineOp::GetRecords)?;
        if !state.logger.meta_loaded {
            return Err(invalid_state("meta table not loaded"));
        }
        let (_, log) = state.selected_log()?;
        if !log.columns.iter().any(|c| c.point == point) {
            return Err(not_found("logged point", point));
        }

        let step = match selector {
            SampleSelector::AllSamples => 1,
            SampleSelector::EveryNth(n) => n.max(1) as u64,
        };
        let mut delivered = 0;
        for record in log
            .records
            .get(point)
            .into_iter()
            .flatten()
            .filter(|r| r.index % step == 0)
            .take(max_records)
        {
            sink.accept(record.clone());
            delivered += 1;
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::layout::{analog_topology, string_topology, StringShape, Topology, TypePair};
    use crate::topology::message::{message_dir, Protocol};

    async fn load(sim: &SimPlatform, rtdb: &str, topo: &Topology) {
        sim.create_database(rtdb).await.unwrap();
        sim.upsert_items(&topo.items(), true).await.unwrap();
        sim.upsert_mapping_records(&topo.mappings()).await.unwrap();
        sim.write_remote_file(&topo.message_lines(), &message_dir(rtdb), MESSAGE_FILE)
            .await
            .unwrap();
    }

    async fn run(sim: &SimPlatform, rtdb: &str, logging: bool) {
        sim.create_test("t", rtdb, "test", 1000).await.unwrap();
        sim.create_session("t", "s", "session", 3, !logging).await.unwrap();
        sim.start_session("t", "s").await.unwrap();
    }

    fn generator(waveform: Waveform, offset: f64) -> GeneratorSpec {
        GeneratorSpec {
            end: EndCondition::Duration,
            waveform,
            amplitude: 1.0,
            frequency: 30.0,
            phase: 0.0,
            offset,
            duty: 100.0,
            start_delay: 0.0,
            duration: 30.0,
        }
    }

    #[tokio::test]
    async fn test_string_loopback_is_nul_padded() {
        let sim = SimPlatform::default();
        load(&sim, "db", &string_topology(&StringShape::default(), Protocol::Tcp)).await;
        run(&sim, "db", false).await;

        sim.set_value("Out.point04", Value::Text("ab".into())).await.unwrap();
        let values = sim.get_values(&["In.point03".to_string()]).await.unwrap();
        assert_eq!(values["In.point03"].value, Value::Text("ab\0".into()));

        // Neighbouring channel untouched.
        let values = sim.get_values(&["In.point01".to_string()]).await.unwrap();
        assert_eq!(values["In.point01"].value, Value::Text(String::new()));
    }

    #[tokio::test]
    async fn test_numeric_loopback_quantizes() {
        let sim = SimPlatform::default();
        let topo = analog_topology(TypePair::new(CvtType::Char, RawType::Char), Protocol::Udp, 2, 18);
        load(&sim, "db", &topo).await;
        run(&sim, "db", true).await;

        sim.set_value("Out.point4", Value::Number(300.0)).await.unwrap();
        let values = sim.get_values(&["In.point3".to_string()]).await.unwrap();
        assert_eq!(values["In.point3"].value, Value::Number(127.0));

        let err = sim.set_value("Out.point2", Value::Text("x".into())).await.unwrap_err();
        assert_eq!(err.code, codes::BAD_ARGUMENT);
    }

    #[tokio::test]
    async fn test_generator_log_is_index_aligned() {
        let config = SimConfig {
            samples_per_run: 50,
            ..SimConfig::default()
        };
        let sim = SimPlatform::new(config);
        let topo = analog_topology(TypePair::new(CvtType::Double, RawType::Double), Protocol::Tcp, 1, 18);
        load(&sim, "db", &topo).await;
        run(&sim, "db", true).await;

        sim.add_generator("Out.point2", &generator(Waveform::Triangle, 0.0)).await.unwrap();
        sim.start_all_generators().await.unwrap();
        sim.stop_session(StopMode::Normal).await.unwrap();

        sim.connect("localhost").await.unwrap();
        sim.select_project("p").await.unwrap();
        sim.select_session("t/s").await.unwrap();
        let info = sim.query_test().await.unwrap();
        assert_eq!(info.record_count, 100);
        sim.meta_table().await.unwrap();

        let mut input = Vec::new();
        let mut output = Vec::new();
        sim.get_records("In.point1", 1100, SampleSelector::AllSamples, &mut input).await.unwrap();
        sim.get_records("Out.point2", 1100, SampleSelector::AllSamples, &mut output).await.unwrap();
        assert_eq!(input.len(), 50);
        for (i, o) in input.iter().zip(&output) {
            assert_eq!(i.index, o.index);
            assert_eq!(i.primary, o.alternate);
            assert!(o.alternate.abs() <= 1.0 + 1e-9);
        }

        let mut sparse = Vec::new();
        let n = sim
            .get_records("In.point1", 10, SampleSelector::EveryNth(2), &mut sparse)
            .await
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(sparse[1].index, 2);
    }

    #[tokio::test]
    async fn test_huge_sample_period_saturates_timestamps() {
        let config = SimConfig {
            samples_per_run: 3,
            sample_period_ms: u64::MAX,
            ..SimConfig::default()
        };
        let sim = SimPlatform::new(config);
        let topo = analog_topology(TypePair::new(CvtType::Double, RawType::Double), Protocol::Tcp, 1, 18);
        load(&sim, "db", &topo).await;
        run(&sim, "db", true).await;
        sim.add_generator("Out.point2", &generator(Waveform::Sine, 0.0)).await.unwrap();
        sim.start_all_generators().await.unwrap();
        sim.stop_session(StopMode::Normal).await.unwrap();

        sim.connect("localhost").await.unwrap();
        sim.select_project("p").await.unwrap();
        sim.select_session("t/s").await.unwrap();
        sim.meta_table().await.unwrap();
        let mut records = Vec::new();
        sim.get_records("In.point1", 10, SampleSelector::AllSamples, &mut records).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].t_sec, SIM_EPOCH_SECS);
        assert_eq!(records[1].t_sec, records[2].t_sec);
        assert!(records[2].t_sec > records[0].t_sec);
    }

    #[tokio::test]
    async fn test_logger_requires_meta_table_first() {
        let sim = SimPlatform::default();
        load(&sim, "db", &analog_topology(TypePair::new(CvtType::Int, RawType::Int), Protocol::Tcp, 1, 18)).await;
        run(&sim, "db", true).await;
        sim.stop_session(StopMode::Normal).await.unwrap();

        let mut sink = Vec::new();
        assert_eq!(
            sim.select_session("t/s").await.unwrap_err().code,
            codes::INVALID_STATE
        );
        sim.connect("localhost").await.unwrap();
        sim.select_project("p").await.unwrap();
        sim.select_session("t/s").await.unwrap();
        let err = sim
            .get_records("In.point1", 10, SampleSelector::AllSamples, &mut sink)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_STATE);
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let sim = SimPlatform::default();
        assert_eq!(sim.delete_database("nope").await.unwrap_err().code, codes::NOT_FOUND);
        assert_eq!(sim.delete_test("nope").await.unwrap_err().code, codes::NOT_FOUND);
        assert_eq!(sim.stop_session(StopMode::Normal).await.unwrap_err().code, codes::INVALID_STATE);

        sim.create_database("db").await.unwrap();
        sim.create_test("t", "db", "", 1000).await.unwrap();
        assert_eq!(
            sim.create_test("t", "db", "", 1000).await.unwrap_err().code,
            codes::ALREADY_EXISTS
        );
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let sim = SimPlatform::default();
        sim.inject_fault(EngineOp::CreateDatabase).await;
        let err = sim.create_database("db").await.unwrap_err();
        assert_eq!(err.code, codes::INJECTED);
        sim.clear_faults().await;
        sim.create_database("db").await.unwrap();
        assert_eq!(
            sim.journal().await,
            vec![EngineOp::CreateDatabase, EngineOp::CreateDatabase]
        );
    }

    #[test]
    fn test_waveforms() {
        let sine = generator(Waveform::Sine, 100.0);
        assert!((waveform_value(&sine, 0.0) - 100.0).abs() < 1e-9);
        let tri = generator(Waveform::Triangle, 0.0);
        assert!((waveform_value(&tri, 1.0 / 120.0) - 1.0).abs() < 1e-9);
        let mut short = generator(Waveform::Sawtooth, 5.0);
        short.duration = 1.0;
        assert_eq!(waveform_value(&short, 2.0), 5.0);
    }

    #[test]
    fn test_pad_string() {
        assert_eq!(pad_string("abc", 3), "abc");
        assert_eq!(pad_string("abcdef", 3), "abc");
        assert_eq!(pad_string("a", 3), "a\0\0");
        assert_eq!(pad_string("anything", 0), "anything");
    }
}
