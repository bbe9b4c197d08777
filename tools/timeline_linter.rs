/// Timeline Linter — validates every command, step key and expression in a
/// timeline directory.
///
/// Usage: timeline_linter <timelines_dir> [--strict]
///
/// Dropped step keys are reported through the log (RUST_LOG=warn, the
/// default). `--strict` turns warnings into a failing exit code.
use cutscene_engine::core::expr;
use cutscene_engine::core::timeline::{Timeline, TimelineCatalog};
use cutscene_engine::schema::command::Command;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: timeline_linter <timelines_dir> [--strict]");
        process::exit(0);
    }

    let dir = Path::new(&args[1]);
    let strict = args[2..].iter().any(|a| a == "--strict");

    if !dir.is_dir() {
        eprintln!("ERROR: '{}' is not a directory", dir.display());
        process::exit(1);
    }

    let catalog = TimelineCatalog::from_dir(dir);
    let names = match catalog.names() {
        Ok(names) => names,
        Err(e) => {
            eprintln!("ERROR: failed to list timelines: {}", e);
            process::exit(1);
        }
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut loaded = 0;

    for name in &names {
        match catalog.try_load(name) {
            Ok(Some(timeline)) => {
                loaded += 1;
                lint_timeline(&timeline, &catalog, &mut errors, &mut warnings);
            }
            Ok(None) => warnings.push(format!("{}: listed but could not be resolved", name)),
            Err(e) => errors.push(format!("{}: {}", name, e)),
        }
    }

    println!("Loaded {} of {} timelines", loaded, names.len());
    println!("\n=== Timeline Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }
    for warning in &warnings {
        println!("WARNING: {}", warning);
    }
    for error in &errors {
        println!("ERROR: {}", error);
    }
    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() && !(strict && !warnings.is_empty()) {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn lint_timeline(
    timeline: &Timeline,
    catalog: &TimelineCatalog,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let name = timeline.name();

    if timeline.is_exhausted() {
        warnings.push(format!("{}: timeline has no commands", name));
        return;
    }

    for (step, queue) in timeline.steps() {
        let at = |line: &str| format!("{} @ {}: '{}'", name, step, line);

        for (i, line) in queue.iter().enumerate() {
            let command = match Command::parse(line) {
                Ok(command) => command,
                Err(e) => {
                    errors.push(format!("{}: {}", at(line), e));
                    continue;
                }
            };

            let expr_error =
                |source: &str| expr::parse(source).err().map(|e| format!("{}: {}", at(line), e));

            match &command {
                Command::Assign { expr: value, .. } => errors.extend(expr_error(value)),
                Command::Invoke { args, .. } => {
                    errors.extend(args.iter().filter_map(|arg| expr_error(arg)))
                }
                Command::SkipTo(target) | Command::SetSkipTarget(target) => {
                    errors.extend(expr_error(target))
                }
                Command::BranchIf(condition) => errors.extend(expr_error(condition)),
                Command::LoopWhile(condition) => {
                    errors.extend(expr_error(condition));
                    if i + 1 == queue.len() {
                        warnings.push(format!("{}: loop-while has an empty body", at(line)));
                    }
                }
                Command::RawExec(source) => {
                    if let Err(e) = expr::parse_statements(source) {
                        errors.push(format!("{}: {}", at(line), e));
                    }
                }
                Command::SwitchTimeline(target) => {
                    if !target.is_empty() && !catalog.contains(target) {
                        errors.push(format!(
                            "{}: switches to unknown timeline '{}'",
                            at(line),
                            target
                        ));
                    }
                    if i + 1 < queue.len() {
                        warnings.push(format!(
                            "{}: commands after a switch at the same step never run",
                            at(line)
                        ));
                    }
                }
                _ => {}
            }
        }
    }
}
