/// The sequencer: drains due timeline commands every simulation tick.
///
/// Wires together the timeline catalog, step clock, object registry,
/// expression evaluator and the host's collaborator surface.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::core::clock::StepClock;
use crate::core::config::{ConfigError, SequencerConfig};
use crate::core::expr::{self, Environment, Expr, ExprError, Statement};
use crate::core::registry::ObjectRegistry;
use crate::core::timeline::{StepKey, Timeline, TimelineCatalog, TimelineError};
use crate::core::watched::WatchedSet;
use crate::schema::command::{Command, CommandError};
use crate::schema::host::{Host, HostError, Scriptable};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("expression error: {0}")]
    Expr(#[from] ExprError),
    #[error("command error: {0}")]
    Command(#[from] CommandError),
    #[error("timeline error: {0}")]
    Timeline(#[from] TimelineError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("host rejected {target}.{attr}: {error}")]
    Host {
        target: String,
        attr: String,
        #[source]
        error: HostError,
    },
    #[error("'{expr}' is not a step position (got {found})")]
    NotAStep { expr: String, found: String },
    #[error("loop-while '{condition}' stopped after {limit} iterations")]
    LoopLimit { condition: String, limit: u32 },
    #[error("startup timeline not found: {0}")]
    MissingStartup(String),
}

/// How a command leaves the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// A branch condition failed: drop the rest of this step.
    BranchFailed,
    /// A loop ran and consumed the rest of its queue.
    LoopDone,
    /// Switch or skip: stop the tick.
    Halt,
}

/// What follows the command being executed, for loop-while to take.
#[derive(Debug, Clone, Copy)]
enum Remainder<'a> {
    Step(StepKey),
    Body(&'a [String]),
}

/// Runs one timeline at a time against a `Host`.
pub struct Sequencer {
    catalog: TimelineCatalog,
    timeline: Timeline,
    clock: StepClock,
    objects: ObjectRegistry,
    config: SequencerConfig,
    rng: StdRng,
    music: Option<String>,
}

/// Builder for constructing a `Sequencer`.
pub struct SequencerBuilder {
    config: SequencerConfig,
    config_path: Option<PathBuf>,
    seed: Option<u64>,
    timelines_dir: Option<String>,
    startup: Option<String>,
    require_startup: bool,
    /// Directly provided catalog (for testing without files).
    catalog: Option<TimelineCatalog>,
    /// Directly provided registry (for testing without a level).
    objects: Option<ObjectRegistry>,
}

impl Sequencer {
    pub fn builder() -> SequencerBuilder {
        SequencerBuilder {
            config: SequencerConfig::default(),
            config_path: None,
            seed: None,
            timelines_dir: None,
            startup: None,
            require_startup: false,
            catalog: None,
            objects: None,
        }
    }

    /// Run one simulation tick.
    ///
    /// Applies any pending jump, drains every due command in step order
    /// until a command breaks the tick, marks a naturally exhausted
    /// timeline as watched, then advances the clock by `delta`.
    pub fn tick(&mut self, delta: f64, host: &mut dyn Host, watched: &mut WatchedSet) {
        self.apply_pending();
        self.drain(host, watched);

        if self.timeline.is_exhausted() && self.timeline.is_named() {
            info!(timeline = self.timeline.name(), "timeline finished");
            watched.mark(self.timeline.name());
            self.timeline.clear_name();
        }

        self.clock.advance(delta);
    }

    /// Replace the running timeline from outside (boss death, trigger
    /// volume). The previous timeline is not marked watched.
    pub fn load(&mut self, name: &str) {
        info!(from = self.timeline.name(), to = name, "loading timeline");
        let timeline = self.catalog.load(name);
        self.install(timeline);
    }

    /// Handle a pause/escape press. Jumps to the armed skip target and
    /// returns true while the cutscene is skippable; returns false so the
    /// host can open its pause menu instead.
    pub fn skip_cutscene(&mut self) -> bool {
        match self.clock.skip_target() {
            Some(target) if self.clock.is_skippable() => {
                info!(timeline = self.timeline.name(), to = target, "cutscene skipped");
                self.jump(target)
            }
            _ => false,
        }
    }

    pub fn is_skippable(&self) -> bool {
        self.clock.is_skippable()
    }

    /// Room entered: restart the remembered music, if any.
    pub fn room_start(&self, host: &mut dyn Host) {
        self.replay_music(host);
    }

    /// Room resumed after a menu or reload: restart the remembered music.
    pub fn room_resume(&self, host: &mut dyn Host) {
        self.replay_music(host);
    }

    fn replay_music(&self, host: &mut dyn Host) {
        if let Some(track) = &self.music {
            host.play_music(track);
        }
    }

    /// Name of the running timeline; empty once finished or when nothing
    /// is loaded.
    pub fn name(&self) -> &str {
        self.timeline.name()
    }

    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn is_running(&self) -> bool {
        !self.timeline.is_exhausted()
    }

    pub fn current_music(&self) -> Option<&str> {
        self.music.as_deref()
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.objects
    }

    pub fn catalog(&self) -> &TimelineCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    fn install(&mut self, timeline: Timeline) {
        self.timeline = timeline;
        self.clock.reset();
    }

    fn apply_pending(&mut self) {
        if let Some(target) = self.clock.take_pending() {
            let dropped = self.timeline.discard_before(target);
            debug!(timeline = self.timeline.name(), to = target, dropped, "fast-forwarded");
        }
    }

    /// Schedule and apply a forward jump. Backward targets are ignored.
    fn jump(&mut self, target: f64) -> bool {
        if !self.clock.skip_to(target) {
            debug!(
                timeline = self.timeline.name(),
                to = target,
                position = self.clock.position(),
                "skip target not ahead, ignored"
            );
            return false;
        }
        self.apply_pending();
        true
    }

    fn switch_to(&mut self, name: &str, watched: &mut WatchedSet) {
        info!(from = self.timeline.name(), to = name, "switching timeline");
        if self.timeline.is_named() {
            watched.mark(self.timeline.name());
        }
        let timeline = self.catalog.load(name);
        self.install(timeline);
    }

    fn drain(&mut self, host: &mut dyn Host, watched: &mut WatchedSet) {
        while let Some(key) = self.timeline.first_due(self.clock.position()) {
            let Some(line) = self.timeline.pop_front(key) else {
                break;
            };
            match self.execute(&line, Remainder::Step(key), host, watched) {
                Flow::Continue => {}
                Flow::BranchFailed => {
                    let dropped = self.timeline.take_step(key).len();
                    trace!(timeline = self.timeline.name(), step = %key, dropped, "branch not taken");
                    break;
                }
                Flow::LoopDone | Flow::Halt => break,
            }
        }
    }

    fn execute(
        &mut self,
        line: &str,
        remainder: Remainder<'_>,
        host: &mut dyn Host,
        watched: &mut WatchedSet,
    ) -> Flow {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(timeline = self.timeline.name(), command = line, error = %e, "malformed command skipped");
                report(host, e.into());
                return Flow::Continue;
            }
        };

        if command == Command::Comment {
            trace!(command = line, "comment");
            return Flow::Continue;
        }
        debug!(
            timeline = self.timeline.name(),
            step = self.clock.position(),
            verb = command.verb(),
            command = line,
            "executing"
        );

        match command {
            Command::Comment => Flow::Continue,
            Command::Assign { target, attr, expr } => {
                if self.resolves(&target, host) {
                    let result = expr::parse(&expr)
                        .map_err(SequencerError::from)
                        .and_then(|value| self.set_on(&target, &attr, &value, host, watched));
                    if let Err(e) = result {
                        report(host, e);
                    }
                } else {
                    trace!(id = %target, "assign target absent, skipped");
                }
                Flow::Continue
            }
            Command::Invoke {
                target,
                method,
                args,
            } => {
                if self.resolves(&target, host) {
                    let result = args
                        .iter()
                        .map(|arg| expr::parse(arg))
                        .collect::<Result<Vec<Expr>, ExprError>>()
                        .map_err(SequencerError::from)
                        .and_then(|args| self.call_on(&target, &method, &args, host, watched));
                    if let Err(e) = result {
                        report(host, e);
                    }
                } else {
                    trace!(id = %target, "invoke target absent, skipped");
                }
                Flow::Continue
            }
            Command::ShowDialog { portrait, text } => {
                host.show_dialog(portrait.as_deref(), &text);
                Flow::Continue
            }
            Command::ChangeMusic(track) => {
                host.play_music(&track);
                self.music = Some(track);
                Flow::Continue
            }
            Command::SwitchTimeline(name) => {
                self.switch_to(&name, watched);
                Flow::Halt
            }
            Command::SkipTo(step) => {
                if let Some(target) = self.step_value(&step, host, watched) {
                    self.jump(target);
                }
                Flow::Halt
            }
            Command::SetSkipTarget(step) => {
                if let Some(target) = self.step_value(&step, host, watched) {
                    self.clock.arm_skip(target);
                }
                Flow::Continue
            }
            Command::RawExec(source) => {
                if let Err(e) = self.raw_exec(&source, host, watched) {
                    report(host, e);
                }
                Flow::Continue
            }
            Command::BranchIf(condition) => {
                if self.condition(&condition, host, watched) {
                    Flow::Continue
                } else {
                    Flow::BranchFailed
                }
            }
            Command::BranchIfWatched => {
                if watched.contains(self.timeline.name()) {
                    Flow::Continue
                } else {
                    Flow::BranchFailed
                }
            }
            Command::BranchIfNotWatched => {
                if watched.contains(self.timeline.name()) {
                    Flow::BranchFailed
                } else {
                    Flow::Continue
                }
            }
            Command::LoopWhile(condition) => {
                let body: Vec<String> = match remainder {
                    Remainder::Step(key) => self.timeline.take_step(key).into(),
                    Remainder::Body(rest) => rest.to_vec(),
                };
                self.run_loop(&condition, &body, host, watched)
            }
        }
    }

    /// Run `body` while `condition` holds, all within the current tick.
    fn run_loop(
        &mut self,
        condition: &str,
        body: &[String],
        host: &mut dyn Host,
        watched: &mut WatchedSet,
    ) -> Flow {
        let limit = self.config.max_loop_iterations;
        let mut iterations = 0;
        while self.condition(condition, host, watched) {
            if iterations >= limit {
                warn!(timeline = self.timeline.name(), condition, limit, "loop-while hit the iteration limit");
                report(
                    host,
                    SequencerError::LoopLimit {
                        condition: condition.to_string(),
                        limit,
                    },
                );
                break;
            }
            iterations += 1;
            if self.run_body(body, host, watched) == Flow::Halt {
                return Flow::Halt;
            }
        }
        trace!(condition, iterations, "loop-while finished");
        Flow::LoopDone
    }

    /// One loop iteration. A failed branch or a nested loop ends it early.
    fn run_body(&mut self, body: &[String], host: &mut dyn Host, watched: &mut WatchedSet) -> Flow {
        for (i, line) in body.iter().enumerate() {
            match self.execute(line, Remainder::Body(&body[i + 1..]), host, watched) {
                Flow::Continue => {}
                Flow::BranchFailed | Flow::LoopDone => break,
                Flow::Halt => return Flow::Halt,
            }
        }
        Flow::Continue
    }

    fn raw_exec(
        &mut self,
        source: &str,
        host: &mut dyn Host,
        watched: &mut WatchedSet,
    ) -> Result<(), SequencerError> {
        for statement in expr::parse_statements(source)? {
            match statement {
                Statement::Assign {
                    target,
                    attr,
                    value,
                } => self.set_on(&target, &attr, &value, host, watched)?,
                Statement::Call {
                    target,
                    method,
                    args,
                } => self.call_on(&target, &method, &args, host, watched)?,
                Statement::Eval(expr) => {
                    self.eval(&expr, host, watched)?;
                }
            }
        }
        Ok(())
    }

    fn set_on(
        &mut self,
        target: &str,
        attr: &str,
        value: &Expr,
        host: &mut dyn Host,
        watched: &WatchedSet,
    ) -> Result<(), SequencerError> {
        if !self.resolves(target, host) {
            trace!(id = target, attr, "assignment target absent, skipped");
            return Ok(());
        }
        let value = self.eval(value, host, watched)?;
        let Some(object) = self.target_mut(target, host) else {
            return Ok(());
        };
        object
            .set_attribute(attr, value)
            .map_err(|error| SequencerError::Host {
                target: target.to_string(),
                attr: attr.to_string(),
                error,
            })
    }

    fn call_on(
        &mut self,
        target: &str,
        method: &str,
        args: &[Expr],
        host: &mut dyn Host,
        watched: &WatchedSet,
    ) -> Result<(), SequencerError> {
        if !self.resolves(target, host) {
            trace!(id = target, method, "call target absent, skipped");
            return Ok(());
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, host, watched)?);
        }
        if let Some(object) = self.target_mut(target, host) {
            if object.call(method, &values).is_none() {
                trace!(id = target, method, "no such method, skipped");
            }
        }
        Ok(())
    }

    fn resolves(&self, target: &str, host: &dyn Host) -> bool {
        resolve_target(target, &self.config.level_target, &self.objects, host).is_some()
    }

    fn target_mut<'h>(&self, target: &str, host: &'h mut dyn Host) -> Option<&'h mut dyn Scriptable> {
        if target == self.config.level_target {
            Some(host.level_mut())
        } else {
            host.entity_mut(self.objects.lookup(target)?)
        }
    }

    fn eval(&mut self, expr: &Expr, host: &dyn Host, watched: &WatchedSet) -> Result<Value, ExprError> {
        let mut scope = Scope {
            host,
            objects: &self.objects,
            watched,
            rng: &mut self.rng,
            level_target: &self.config.level_target,
            position: self.clock.position(),
            timeline: self.timeline.name(),
        };
        expr::eval(expr, &mut scope)
    }

    fn evaluate(&mut self, source: &str, host: &dyn Host, watched: &WatchedSet) -> Result<Value, ExprError> {
        let expr = expr::parse(source)?;
        self.eval(&expr, host, watched)
    }

    /// Evaluate a branch or loop condition. Failures count as false.
    fn condition(&mut self, condition: &str, host: &mut dyn Host, watched: &WatchedSet) -> bool {
        match self.evaluate(condition, host, watched) {
            Ok(value) => value.truthy(),
            Err(e) => {
                warn!(timeline = self.timeline.name(), condition, error = %e, "condition failed, treated as false");
                report(host, e.into());
                false
            }
        }
    }

    fn step_value(&mut self, source: &str, host: &mut dyn Host, watched: &WatchedSet) -> Option<f64> {
        match self.evaluate(source, host, watched) {
            Ok(value) => match value.as_f64() {
                Some(step) if matches!(value, Value::Int(_) | Value::Float(_)) => Some(step),
                _ => {
                    report(
                        host,
                        SequencerError::NotAStep {
                            expr: source.to_string(),
                            found: value.type_name().to_string(),
                        },
                    );
                    None
                }
            },
            Err(e) => {
                report(host, e.into());
                None
            }
        }
    }
}

fn report(host: &mut dyn Host, error: SequencerError) {
    debug!(error = %error, "reporting to host");
    host.report_error(&error);
}

fn resolve_target<'h>(
    target: &str,
    level_target: &str,
    objects: &ObjectRegistry,
    host: &'h dyn Host,
) -> Option<&'h dyn Scriptable> {
    if target == level_target {
        Some(host.level())
    } else {
        host.entity(objects.lookup(target)?)
    }
}

/// What expressions see while a command runs.
struct Scope<'a> {
    host: &'a dyn Host,
    objects: &'a ObjectRegistry,
    watched: &'a WatchedSet,
    rng: &'a mut StdRng,
    level_target: &'a str,
    position: f64,
    timeline: &'a str,
}

impl Environment for Scope<'_> {
    fn attribute(&self, target: &str, attr: &str) -> Result<Value, ExprError> {
        let object = resolve_target(target, self.level_target, self.objects, self.host)
            .ok_or_else(|| ExprError::UnknownTarget(target.to_string()))?;
        object
            .attribute(attr)
            .ok_or_else(|| ExprError::MissingAttribute {
                target: target.to_string(),
                attr: attr.to_string(),
            })
    }

    fn variable(&self, name: &str) -> Option<Value> {
        match name {
            "step" => Some(Value::Float(self.position)),
            "timeline" => Some(Value::Str(self.timeline.to_string())),
            _ => None,
        }
    }

    fn is_watched(&self, name: &str) -> bool {
        self.watched.contains(name)
    }

    fn exists(&self, target: &str) -> bool {
        resolve_target(target, self.level_target, self.objects, self.host).is_some()
    }

    fn random(&mut self) -> Option<f64> {
        Some(self.rng.gen::<f64>())
    }

    fn random_int(&mut self, lo: i64, hi: i64) -> Option<i64> {
        Some(self.rng.gen_range(lo..=hi))
    }
}

impl SequencerBuilder {
    pub fn config(mut self, config: SequencerConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the config from a RON file at build time.
    pub fn config_file(mut self, path: &Path) -> Self {
        self.config_path = Some(path.to_path_buf());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn timelines_dir(mut self, path: &str) -> Self {
        self.timelines_dir = Some(path.to_string());
        self
    }

    /// Timeline to load when the sequencer is built.
    pub fn startup(mut self, name: &str) -> Self {
        self.startup = Some(name.to_string());
        self
    }

    /// Fail `build()` when the startup timeline cannot be found.
    pub fn require_startup(mut self, required: bool) -> Self {
        self.require_startup = required;
        self
    }

    /// Provide the catalog directly (for testing without files).
    pub fn with_catalog(mut self, catalog: TimelineCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Provide the object registry directly.
    pub fn with_objects(mut self, objects: ObjectRegistry) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn build(self) -> Result<Sequencer, SequencerError> {
        let mut config = match &self.config_path {
            Some(path) => SequencerConfig::load_from_ron(path)?,
            None => self.config,
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(dir) = self.timelines_dir {
            config.timelines_dir = Some(dir);
        }

        let mut catalog = self.catalog.unwrap_or_default();
        if catalog.dir().is_none() {
            if let Some(dir) = &config.timelines_dir {
                catalog = catalog.with_dir(dir);
            }
        }

        let timeline = match (&self.startup, self.require_startup) {
            (Some(name), true) => catalog.require(name).map_err(|e| match e {
                TimelineError::MissingSequence(name) => SequencerError::MissingStartup(name),
                other => SequencerError::Timeline(other),
            })?,
            (Some(name), false) => catalog.load(name),
            (None, true) => return Err(SequencerError::MissingStartup(String::new())),
            (None, false) => Timeline::empty(),
        };

        Ok(Sequencer {
            catalog,
            timeline,
            clock: StepClock::new(),
            objects: self.objects.unwrap_or_default(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            music: None,
        })
    }
}
