/// Timeline Player — runs a timeline headlessly and prints every effect.
///
/// Usage: timeline_player <timelines_dir> <name> [options]
///
/// Options:
///   --delta <f>        step advance per tick (default 1.0)
///   --max-ticks <n>    stop after n ticks (default 10000)
///   --seed <n>         RNG seed for random()/chance()/randint()
///   --entity <id>      register a console entity under id (repeatable)
///   --skip-at <n>      press "skip cutscene" before tick n
///   --slot <path>      read watched memory from a save slot, write it back
///                      when the run ends
use cutscene_engine::core::registry::{EntityArena, EntityHandle};
use cutscene_engine::core::sequencer::{Sequencer, SequencerError};
use cutscene_engine::core::watched::WatchedSet;
use cutscene_engine::schema::host::{Host, HostError, Scriptable};
use cutscene_engine::schema::save::SaveSlot;
use cutscene_engine::schema::value::Value;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// A scriptable that prints what happens to it.
struct ConsoleObject {
    id: String,
    attrs: FxHashMap<String, Value>,
}

impl ConsoleObject {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            attrs: FxHashMap::default(),
        }
    }
}

impl Scriptable for ConsoleObject {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.attrs.get(name).cloned()
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> Result<(), HostError> {
        println!("    {}.{} = {}", self.id, name, value);
        self.attrs.insert(name.to_string(), value);
        Ok(())
    }

    fn call(&mut self, method: &str, args: &[Value]) -> Option<Value> {
        let args: Vec<String> = args.iter().map(Value::to_string).collect();
        println!("    {}.{}({})", self.id, method, args.join(", "));
        Some(Value::None)
    }
}

struct ConsoleHost {
    level: ConsoleObject,
    entities: EntityArena<ConsoleObject>,
}

impl Host for ConsoleHost {
    fn level(&self) -> &dyn Scriptable {
        &self.level
    }

    fn level_mut(&mut self) -> &mut dyn Scriptable {
        &mut self.level
    }

    fn entity(&self, handle: EntityHandle) -> Option<&dyn Scriptable> {
        self.entities.get(handle).map(|e| e as &dyn Scriptable)
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut dyn Scriptable> {
        self.entities.get_mut(handle).map(|e| e as &mut dyn Scriptable)
    }

    fn show_dialog(&mut self, portrait: Option<&str>, text: &str) {
        match portrait {
            Some(portrait) => println!("    [{}] {}", portrait, text),
            None => println!("    {}", text),
        }
    }

    fn play_music(&mut self, track: &str) {
        println!("    ♪ {}", track);
    }

    fn report_error(&mut self, error: &SequencerError) {
        println!("    ! {}", error);
    }
}

struct Options {
    dir: String,
    name: String,
    delta: f64,
    max_ticks: u64,
    seed: u64,
    entities: Vec<String>,
    skip_at: Option<u64>,
    slot: Option<PathBuf>,
}

fn print_usage() {
    println!("Usage: timeline_player <timelines_dir> <name> [options]");
    println!();
    println!("Options:");
    println!("  --delta <f>        step advance per tick (default 1.0)");
    println!("  --max-ticks <n>    stop after n ticks (default 10000)");
    println!("  --seed <n>         RNG seed");
    println!("  --entity <id>      register a console entity (repeatable)");
    println!("  --skip-at <n>      press skip before tick n");
    println!("  --slot <path>      save slot holding watched memory");
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        dir: args[1].clone(),
        name: args[2].clone(),
        delta: 1.0,
        max_ticks: 10_000,
        seed: 0,
        entities: Vec::new(),
        skip_at: None,
        slot: None,
    };

    let mut i = 3;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--delta", Some(v)) => options.delta = v.parse().unwrap_or(1.0),
            ("--max-ticks", Some(v)) => options.max_ticks = v.parse().unwrap_or(10_000),
            ("--seed", Some(v)) => options.seed = v.parse().unwrap_or(0),
            ("--entity", Some(v)) => options.entities.push(v.clone()),
            ("--skip-at", Some(v)) => options.skip_at = v.parse().ok(),
            ("--slot", Some(v)) => options.slot = Some(PathBuf::from(v)),
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                process::exit(1);
            }
        }
        i += 2;
    }

    options
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }
    let options = parse_args(&args);

    let mut watched = match &options.slot {
        Some(path) if path.exists() => match SaveSlot::load_from_ron(path) {
            Ok(slot) => slot.watched_timelines,
            Err(e) => {
                eprintln!("ERROR: failed to read save slot: {}", e);
                process::exit(1);
            }
        },
        _ => WatchedSet::new(),
    };

    let mut sequencer = match Sequencer::builder()
        .timelines_dir(&options.dir)
        .seed(options.seed)
        .startup(&options.name)
        .require_startup(true)
        .build()
    {
        Ok(sequencer) => sequencer,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(1);
        }
    };

    let mut host = ConsoleHost {
        level: ConsoleObject::new(&sequencer.config().level_target),
        entities: EntityArena::new(),
    };
    for id in &options.entities {
        let handle = host.entities.insert(ConsoleObject::new(id));
        sequencer.objects_mut().register(Some(id.as_str()), handle);
    }

    println!("Playing '{}' (delta {})", options.name, options.delta);
    sequencer.room_start(&mut host);

    let mut tick = 0;
    while tick < options.max_ticks {
        if options.skip_at == Some(tick) {
            let skipped = sequencer.skip_cutscene();
            println!("-- skip pressed: {}", if skipped { "skipped" } else { "not skippable" });
        }
        println!("tick {:>4} @ {:>8.2} [{}]", tick, sequencer.position(), sequencer.name());
        sequencer.tick(options.delta, &mut host, &mut watched);
        tick += 1;
        if !sequencer.is_running() {
            break;
        }
    }

    let mut names: Vec<&str> = watched.iter().collect();
    names.sort_unstable();
    println!("\nFinished after {} ticks. Watched: {:?}", tick, names);

    if let Some(path) = &options.slot {
        if let Err(e) = SaveSlot::capture(&watched).save_to_ron(path) {
            eprintln!("ERROR: failed to write save slot: {}", e);
            process::exit(1);
        }
    }
}
