/// Sequencer integration tests — timelines driven tick by tick against a
/// recording host.
use cutscene_engine::core::registry::{EntityArena, EntityHandle};
use cutscene_engine::core::sequencer::{Sequencer, SequencerError};
use cutscene_engine::core::timeline::TimelineCatalog;
use cutscene_engine::core::watched::WatchedSet;
use cutscene_engine::schema::host::{Host, HostError, Scriptable};
use cutscene_engine::schema::save::SaveSlot;
use cutscene_engine::schema::value::Value;
use rustc_hash::FxHashMap;
use std::path::Path;

const FIXTURES: &str = "tests/fixtures/timelines";

#[derive(Default)]
struct Actor {
    attrs: FxHashMap<String, Value>,
    calls: Vec<(String, Vec<Value>)>,
}

impl Actor {
    fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }
}

impl Scriptable for Actor {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.attrs.get(name).cloned()
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> Result<(), HostError> {
        if name == "id" {
            return Err(HostError::ReadOnly(name.to_string()));
        }
        self.attrs.insert(name.to_string(), value);
        Ok(())
    }

    fn call(&mut self, method: &str, args: &[Value]) -> Option<Value> {
        match method {
            "shake" | "explode" | "take_damage" | "open" => {
                self.calls.push((method.to_string(), args.to_vec()));
                Some(Value::None)
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct TestHost {
    level: Actor,
    actors: EntityArena<Actor>,
    dialogs: Vec<(Option<String>, String)>,
    music: Vec<String>,
    errors: Vec<String>,
}

impl TestHost {
    fn texts(&self) -> Vec<&str> {
        self.dialogs.iter().map(|(_, text)| text.as_str()).collect()
    }
}

impl Host for TestHost {
    fn level(&self) -> &dyn Scriptable {
        &self.level
    }

    fn level_mut(&mut self) -> &mut dyn Scriptable {
        &mut self.level
    }

    fn entity(&self, handle: EntityHandle) -> Option<&dyn Scriptable> {
        self.actors.get(handle).map(|a| a as &dyn Scriptable)
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut dyn Scriptable> {
        self.actors.get_mut(handle).map(|a| a as &mut dyn Scriptable)
    }

    fn show_dialog(&mut self, portrait: Option<&str>, text: &str) {
        self.dialogs
            .push((portrait.map(str::to_string), text.to_string()));
    }

    fn play_music(&mut self, track: &str) {
        self.music.push(track.to_string());
    }

    fn report_error(&mut self, error: &SequencerError) {
        self.errors.push(error.to_string());
    }
}

fn from_doc(name: &str, doc: &str) -> Sequencer {
    Sequencer::builder()
        .with_catalog(TimelineCatalog::new().with_document(name, doc))
        .startup(name)
        .build()
        .unwrap()
}

fn from_fixtures(name: &str) -> Sequencer {
    Sequencer::builder()
        .timelines_dir(FIXTURES)
        .startup(name)
        .require_startup(true)
        .build()
        .unwrap()
}

fn run(seq: &mut Sequencer, host: &mut TestHost, watched: &mut WatchedSet, ticks: usize) {
    for _ in 0..ticks {
        seq.tick(1.0, host, watched);
    }
}

#[test]
fn scripted_example_plays_in_step_order() {
    let mut seq = from_fixtures("intro");
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 1);
    assert_eq!(host.level.get("flag"), Some(&Value::Int(1)));
    assert!(host.dialogs.is_empty());

    run(&mut seq, &mut host, &mut watched, 2);
    assert_eq!(host.texts(), vec!["hi"]);
    assert!(!watched.contains("intro"));

    run(&mut seq, &mut host, &mut watched, 3);
    assert_eq!(seq.name(), "other");
    assert!(watched.contains("intro"));
    assert!(!watched.contains("other"));
}

#[test]
fn only_due_steps_drain() {
    let mut seq = from_doc("t", r#"{ "0": ["dialog a"], "2": ["dialog b"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.5, &mut host, &mut watched);
    assert_eq!(host.texts(), vec!["a"]);
    seq.tick(1.5, &mut host, &mut watched);
    assert_eq!(host.texts(), vec!["a"]);
    seq.tick(1.5, &mut host, &mut watched);
    assert_eq!(host.texts(), vec!["a", "b"]);
}

#[test]
fn fractional_deltas_accumulate() {
    let mut seq = from_doc("t", r#"{ "1": ["dialog one"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    for _ in 0..4 {
        seq.tick(0.25, &mut host, &mut watched);
    }
    assert!(host.dialogs.is_empty());
    seq.tick(0.25, &mut host, &mut watched);
    assert_eq!(host.texts(), vec!["one"]);
}

#[test]
fn switch_resets_clock_and_discards_old_queue() {
    let catalog = TimelineCatalog::new()
        .with_document("a", r#"{ "0": ["timeline b", "dialog never"], "1": ["dialog never again"] }"#)
        .with_document("b", r#"{ "0": ["dialog b0"], "3": ["dialog b3"] }"#);
    let mut seq = Sequencer::builder()
        .with_catalog(catalog)
        .startup("a")
        .build()
        .unwrap();
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(seq.name(), "b");
    assert_eq!(seq.position(), 1.0);
    assert!(watched.contains("a"));

    run(&mut seq, &mut host, &mut watched, 4);
    assert_eq!(host.texts(), vec!["b0", "b3"]);
}

#[test]
fn switch_to_empty_name_stops_without_marking() {
    let mut seq = from_doc("t", r#"{ "0": ["timeline", "dialog never"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 2);
    assert!(host.dialogs.is_empty());
    assert!(!seq.is_running());
    assert_eq!(seq.name(), "");
    assert_eq!(watched.iter().collect::<Vec<_>>(), vec!["t"]);
}

#[test]
fn switch_to_missing_timeline_runs_empty() {
    let mut seq = from_doc("t", r#"{ "0": ["timeline nowhere"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 3);
    assert!(!seq.is_running());
    assert!(watched.contains("t"));
    assert!(!watched.contains("nowhere"));
}

#[test]
fn natural_exhaustion_marks_once() {
    let mut seq = from_doc(
        "linear",
        r#"{ "0": ["dialog one"], "1": ["dialog two"], "3": ["dialog three"] }"#,
    );
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 3);
    assert!(!watched.contains("linear"));
    run(&mut seq, &mut host, &mut watched, 1);
    assert!(watched.contains("linear"));
    assert_eq!(seq.name(), "");

    run(&mut seq, &mut host, &mut watched, 5);
    assert_eq!(watched.len(), 1);
    assert_eq!(host.texts(), vec!["one", "two", "three"]);
}

#[test]
fn not_watched_branch_flips_after_mark() {
    let doc = r#"{ "0": ["if_not_watched", "dialog 'first time'"], "1": ["dialog always"] }"#;
    let mut seq = from_doc("tutorial", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 3);
    assert_eq!(host.texts(), vec!["first time", "always"]);
    assert!(watched.contains("tutorial"));

    seq.load("tutorial");
    run(&mut seq, &mut host, &mut watched, 3);
    assert_eq!(host.texts(), vec!["first time", "always", "always"]);
}

#[test]
fn watched_branch_requires_mark() {
    let doc = r#"{ "0": ["branch-if-watched", "dialog again"] }"#;
    let mut host = TestHost::default();

    let mut fresh = WatchedSet::new();
    from_doc("t", doc).tick(1.0, &mut host, &mut fresh);
    assert!(host.dialogs.is_empty());

    let mut seen: WatchedSet = ["t"].into_iter().collect();
    from_doc("t", doc).tick(1.0, &mut host, &mut seen);
    assert_eq!(host.texts(), vec!["again"]);
}

#[test]
fn failed_branch_clears_only_its_step() {
    let mut seq = from_doc(
        "t",
        r#"{ "0": ["if 1 > 2", "dialog skipped", "assign __level__ x 1"], "1": ["dialog later"] }"#,
    );
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 2);
    assert_eq!(host.texts(), vec!["later"]);
    assert!(host.level.get("x").is_none());
    assert!(host.errors.is_empty());
}

#[test]
fn broken_condition_is_reported_and_false() {
    let mut seq = from_doc("t", r#"{ "0": ["if ghost.hp > 0", "dialog skipped"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 1);
    assert!(host.dialogs.is_empty());
    assert_eq!(host.errors.len(), 1);
    assert!(host.errors[0].contains("ghost"));
}

#[test]
fn failed_assign_is_reported_and_skipped() {
    let doc = r#"{ "0": [
        "assign __level__ hp bogus + 1",
        "assign __level__ mood 'calm'",
        "dialog next",
    ] }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 1);
    assert_eq!(host.errors.len(), 1);
    assert!(host.errors[0].contains("bogus"));
    assert_eq!(host.level.get("hp"), None);
    assert_eq!(host.level.get("mood"), Some(&Value::Str("calm".to_string())));
    assert_eq!(host.texts(), vec!["next"]);
}

#[test]
fn failed_invoke_argument_skips_the_call() {
    let doc = r#"{ "0": [
        "call __level__ shake 2 1/0",
        "call __level__ shake 3",
        "dialog next",
    ] }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 1);
    assert_eq!(host.errors.len(), 1);
    assert_eq!(
        host.level.calls,
        vec![("shake".to_string(), vec![Value::Int(3)])]
    );
    assert_eq!(host.texts(), vec!["next"]);
}

#[test]
fn raw_exec_stops_at_the_first_failing_statement() {
    let doc = r#"{ "0": [
        "exec __level__.a = 1; __level__.b = 1 / 0; __level__.c = 3",
        "dialog next",
    ] }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 1);
    assert_eq!(host.errors.len(), 1);
    assert_eq!(host.level.get("a"), Some(&Value::Int(1)));
    assert_eq!(host.level.get("b"), None);
    assert_eq!(host.level.get("c"), None);
    assert_eq!(host.texts(), vec!["next"]);
}

#[test]
fn skip_to_never_runs_intervening_commands() {
    let doc = r#"{
        "0": ["dialog before", "skip-to 10", "dialog same step"],
        "3": ["assign __level__ x 1", "dialog no", "music no", "call __level__ shake"],
        "9.99": ["dialog edge"],
        "10": ["dialog target"],
    }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(seq.position(), 11.0);
    seq.tick(1.0, &mut host, &mut watched);

    assert_eq!(host.texts(), vec!["before", "target"]);
    assert!(host.level.get("x").is_none());
    assert!(host.music.is_empty());
    assert!(host.level.calls.is_empty());
    assert!(watched.contains("t"));
}

#[test]
fn backward_skip_is_ignored_but_breaks() {
    let doc = r#"{ "0": ["dialog a"], "2": ["skip-to 1", "dialog b"], "3": ["dialog c"] }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 3);
    assert_eq!(host.texts(), vec!["a"]);
    assert_eq!(seq.position(), 3.0);

    run(&mut seq, &mut host, &mut watched, 1);
    assert_eq!(host.texts(), vec!["a", "b", "c"]);
}

// Pins the open watched-on-skip choice: skip-to never marks by itself, but
// emptying every step counts as natural exhaustion.
#[test]
fn skip_past_end_marks_through_exhaustion() {
    let mut seq = from_doc("t", r#"{ "0": ["skip-to 50"], "5": ["dialog never"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert!(!seq.is_running());
    assert!(watched.contains("t"));
    assert!(host.dialogs.is_empty());
}

#[test]
fn cutscene_skip_jumps_to_armed_target() {
    let mut seq = from_fixtures("skippable");
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    assert!(!seq.skip_cutscene());
    run(&mut seq, &mut host, &mut watched, 2);
    assert!(seq.is_skippable());
    assert_eq!(host.texts(), vec!["Long ago..."]);

    assert!(seq.skip_cutscene());
    assert_eq!(seq.position(), 20.0);
    assert!(!seq.is_skippable());
    assert!(!seq.skip_cutscene());

    run(&mut seq, &mut host, &mut watched, 2);
    assert_eq!(host.texts(), vec!["Long ago...", "Go."]);
    assert!(host.level.get("camera").is_none());
    assert_eq!(host.level.get("input_locked"), Some(&Value::Bool(false)));
    assert!(watched.contains("skippable"));
}

#[test]
fn loop_runs_within_one_tick() {
    let doc = r#"{
        "0": [
            "assign __level__ n 0",
            "while __level__.n < 3",
            "assign __level__ n __level__.n + 1",
            "dialog looped",
        ],
        "1": ["dialog after"],
    }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(host.level.get("n"), Some(&Value::Int(3)));
    assert_eq!(host.texts(), vec!["looped", "looped", "looped"]);
    assert!(host.errors.is_empty());

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(host.texts().last(), Some(&"after"));
}

#[test]
fn loop_with_false_condition_clears_body() {
    let mut seq = from_doc("t", r#"{ "0": ["while false", "dialog never"], "1": ["dialog next"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 2);
    assert_eq!(host.texts(), vec!["next"]);
}

#[test]
fn branch_inside_loop_ends_iteration() {
    let doc = r#"{ "0": [
        "assign __level__ n 0",
        "while __level__.n < 4",
        "assign __level__ n __level__.n + 1",
        "if __level__.n % 2 == 0",
        "dialog even",
    ] }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(host.texts(), vec!["even", "even"]);
}

#[test]
fn nested_loops() {
    let doc = r#"{ "0": [
        "assign __level__ i 0",
        "while __level__.i < 2",
        "assign __level__ i __level__.i + 1",
        "assign __level__ j 0",
        "while __level__.j < 3",
        "assign __level__ j __level__.j + 1",
        "call __level__ shake __level__.i __level__.j",
    ] }"#;
    let mut seq = from_doc("t", doc);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    let pairs: Vec<(i64, i64)> = host
        .level
        .calls
        .iter()
        .map(|(_, args)| match args.as_slice() {
            [Value::Int(i), Value::Int(j)] => (*i, *j),
            other => panic!("unexpected args {:?}", other),
        })
        .collect();
    assert_eq!(pairs, vec![(1, 1), (1, 2), (1, 3), (2, 1), (2, 2), (2, 3)]);
}

#[test]
fn switch_inside_loop_halts() {
    let catalog = TimelineCatalog::new()
        .with_document("a", r#"{ "0": ["while true", "timeline b", "dialog never"] }"#)
        .with_document("b", r#"{ "0": ["dialog 'in b'"] }"#);
    let mut seq = Sequencer::builder()
        .with_catalog(catalog)
        .startup("a")
        .build()
        .unwrap();
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(seq.name(), "b");
    assert!(host.errors.is_empty());
    assert!(host.dialogs.is_empty());

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(host.texts(), vec!["in b"]);
}

#[test]
fn entity_commands_reach_live_entities() {
    let mut seq = from_doc(
        "t",
        r#"{ "0": [
            "assign boss hp 10",
            "call boss take_damage 3 'fire'",
            "exec boss.hp = boss.hp - 3; __level__.shake(2)",
            "if exists('boss') and boss.hp == 7",
            "dialog boss weakened",
        ] }"#,
    );
    let mut host = TestHost::default();
    let boss = host.actors.insert(Actor::default());
    seq.objects_mut().register(Some("boss"), boss);
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    let actor = host.actors.get(boss).unwrap();
    assert_eq!(actor.get("hp"), Some(&Value::Int(7)));
    assert_eq!(
        actor.calls,
        vec![(
            "take_damage".to_string(),
            vec![Value::Int(3), Value::from("fire")]
        )]
    );
    assert_eq!(host.level.calls, vec![("shake".to_string(), vec![Value::Int(2)])]);
    assert_eq!(
        host.dialogs,
        vec![(Some("boss".to_string()), "weakened".to_string())]
    );
}

#[test]
fn destroyed_entities_are_silent_no_ops() {
    let mut seq = from_doc(
        "t",
        r#"{ "0": ["assign boss hp 0", "call boss explode", "exec boss.hp = 1", "dialog done"] }"#,
    );
    let mut host = TestHost::default();
    let boss = host.actors.insert(Actor::default());
    seq.objects_mut().register(Some("boss"), boss);
    host.actors.remove(boss);
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert!(host.errors.is_empty());
    assert_eq!(host.texts(), vec!["done"]);
    assert!(host.actors.is_empty());
}

#[test]
fn unknown_method_is_silent_but_rejected_write_is_reported() {
    let mut seq = from_doc(
        "t",
        r#"{ "0": ["call __level__ fly", "assign __level__ id 4", "assign __level__ ok 1"] }"#,
    );
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(host.errors.len(), 1);
    assert!(host.errors[0].contains("read-only"));
    assert_eq!(host.level.get("ok"), Some(&Value::Int(1)));
}

#[test]
fn external_load_does_not_mark_previous() {
    let mut seq = Sequencer::builder()
        .timelines_dir(FIXTURES)
        .startup("intro")
        .build()
        .unwrap();
    let mut host = TestHost::default();
    let boss = host.actors.insert(Actor::default());
    seq.objects_mut().register(Some("boss"), boss);
    let mut watched = WatchedSet::new();

    run(&mut seq, &mut host, &mut watched, 1);
    seq.load("boss_death");
    assert_eq!(seq.position(), 0.0);
    run(&mut seq, &mut host, &mut watched, 4);

    assert!(!watched.contains("intro"));
    assert!(watched.contains("boss_death"));
    assert_eq!(host.texts(), vec!["Is it over?"]);
    assert_eq!(host.actors.get(boss).unwrap().calls.len(), 1);
    assert_eq!(host.level.get("input_locked"), Some(&Value::Bool(false)));
}

#[test]
fn music_is_remembered_for_room_resume() {
    let mut seq = from_fixtures("other");
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();

    seq.room_start(&mut host);
    assert!(host.music.is_empty());

    seq.tick(1.0, &mut host, &mut watched);
    assert_eq!(seq.current_music(), Some("other_theme"));
    assert_eq!(
        host.dialogs,
        vec![(Some("narrator".to_string()), "Elsewhere.".to_string())]
    );

    seq.room_resume(&mut host);
    assert_eq!(host.music, vec!["other_theme", "other_theme"]);
}

#[test]
fn config_file_drives_builder() {
    let seq = Sequencer::builder()
        .config_file(Path::new("tests/fixtures/config.ron"))
        .startup("intro")
        .require_startup(true)
        .build()
        .unwrap();
    assert_eq!(seq.config().max_loop_iterations, 50);
    assert_eq!(seq.config().seed, 9);
    assert_eq!(seq.name(), "intro");
}

#[test]
fn broken_startup_surfaces_parse_error() {
    let result = Sequencer::builder()
        .timelines_dir(FIXTURES)
        .startup("broken")
        .require_startup(true)
        .build();
    assert!(matches!(result, Err(SequencerError::Timeline(_))));
}

#[test]
fn watched_memory_survives_a_save_slot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slot1.ron");

    let mut seq = from_doc("tutorial", r#"{ "0": ["if_not_watched", "dialog first"] }"#);
    let mut host = TestHost::default();
    let mut watched = WatchedSet::new();
    run(&mut seq, &mut host, &mut watched, 1);
    SaveSlot::capture(&watched).save_to_ron(&path).unwrap();

    let restored = SaveSlot::load_from_ron(&path).unwrap();
    let mut watched = restored.watched_timelines;
    let mut seq = from_doc("tutorial", r#"{ "0": ["if_not_watched", "dialog first"] }"#);
    run(&mut seq, &mut host, &mut watched, 1);

    assert_eq!(host.texts(), vec!["first"]);
}
