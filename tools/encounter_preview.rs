/// Encounter preview: interactive shell for recording interactions and
/// previewing the encounters they produce.
///
/// Usage: encounter_preview [--config <path>] [--phrasebook <path>] [--voices <path>]
///                          [--save <path>] [--seed <n>] [-v | -vv]
///
/// Commands:
///   record <kind> <a> <b> <location> <intensity> [description]  (record an interaction)
///   encounter <a> <b> <location> [kind] [+observer]             (preview an encounter)
///   apply                                 (commit the last previewed encounter)
///   recall <agent> <location> [keyword]   (show recalled memories)
///   relations <agent>                     (list an agent's relationships)
///   newrun                                (start a new playthrough)
///   save / load                           (write or read the snapshot)
///   help                                  (list commands)
///   quit                                  (exit)
use alliance_memory::core::collaborators::{FlagError, FlagStore, MemoryStore, RonFileStore};
use alliance_memory::core::config::AllianceConfig;
use alliance_memory::core::orchestrator::EncounterContext;
use alliance_memory::core::recall::RecallTrigger;
use alliance_memory::schema::agent::{AgentId, Value};
use alliance_memory::schema::encounter::{Encounter, EncounterKind, EncounterOutcome};
use alliance_memory::schema::event::{EventContext, EventDraft, InteractionKind};
use alliance_memory::{AllianceSession, AllianceSessionBuilder};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

/// Prints flag writes instead of storing them.
struct EchoFlags;

impl FlagStore for EchoFlags {
    fn set_flag(&mut self, key: &str, value: Value) -> Result<(), FlagError> {
        println!("  flag {key} = {value:?}");
        Ok(())
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = None;
    let mut phrasebook_path = None;
    let mut voices_path = None;
    let mut save_path = None;
    let mut seed: Option<u64> = None;
    let mut verbose = 0u8;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return;
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--phrasebook" if i + 1 < args.len() => {
                i += 1;
                phrasebook_path = Some(args[i].clone());
            }
            "--voices" if i + 1 < args.len() => {
                i += 1;
                voices_path = Some(args[i].clone());
            }
            "--save" if i + 1 < args.len() => {
                i += 1;
                save_path = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().ok();
            }
            "-v" => verbose = verbose.max(1),
            "-vv" => verbose = 2,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    init_tracing(verbose);

    let mut builder = AllianceSession::builder().flag_store(EchoFlags);
    builder = match &config_path {
        Some(path) => match AllianceConfig::load_from_ron(Path::new(path)) {
            Ok(config) => builder.with_config(with_seed(config, seed)),
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => builder.with_config(with_seed(AllianceConfig::default(), seed)),
    };
    if let Some(path) = &phrasebook_path {
        builder = builder.phrasebook_file(path);
    }
    if let Some(path) = &voices_path {
        builder = builder.voices_file(path);
    }
    builder = attach_store(builder, save_path.as_deref());

    let mut session = match builder.build() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    println!("Run: {}", session.ledger().run_id());
    println!("Type 'help' for commands.\n");

    let mut last_encounter: Option<Encounter> = None;

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("alliance> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "record" => {
                if parts.len() < 6 {
                    println!("Usage: record <kind> <a> <b> <location> <intensity> [description]");
                    println!("  kind: cooperation, betrayal, rescue, sacrifice, shared-secret,");
                    println!("        mutual-support, conflict, reconciliation");
                    continue;
                }
                let Some(kind) = InteractionKind::parse(parts[1]) else {
                    println!("Unknown interaction kind: {}", parts[1]);
                    continue;
                };
                let Ok(intensity) = parts[5].parse::<f32>() else {
                    println!("Invalid intensity: {}", parts[5]);
                    continue;
                };
                let description = parts[6..].join(" ");
                let event = session.record_event(
                    EventDraft::new(kind, parts[2], parts[3], EventContext::at(parts[4]), intensity)
                        .described(description),
                );
                let a = AgentId::new(parts[2]);
                let b = AgentId::new(parts[3]);
                if let Some(record) = session.relationship(&a, &b) {
                    println!(
                        "Recorded {} (intensity {:.2}). Trust {:.3}, trajectory {}.",
                        event.kind,
                        event.intensity,
                        record.overall_trust_level,
                        record.relationship_trajectory.name()
                    );
                }
            }
            "encounter" => {
                if parts.len() < 4 {
                    println!("Usage: encounter <a> <b> <location> [kind] [+observer]");
                    continue;
                }
                let a = AgentId::new(parts[1]);
                let b = AgentId::new(parts[2]);
                let mut context = EncounterContext::at(parts[3]);
                let mut forced = None;
                for extra in &parts[4..] {
                    if let Some(observer) = extra.strip_prefix('+') {
                        context = context.with_present(observer);
                    } else {
                        match EncounterKind::parse(extra) {
                            Some(kind) => forced = Some(kind),
                            None => println!("Ignoring unknown encounter kind: {}", extra),
                        }
                    }
                }
                let encounter = match forced {
                    Some(kind) => session.generate_encounter_as(kind, &a, &b, &context),
                    None => session.generate_encounter(&a, &b, &context),
                };
                print_encounter(&encounter);
                last_encounter = Some(encounter);
            }
            "apply" => match &last_encounter {
                Some(encounter) => {
                    let report = session.apply_outcomes(encounter);
                    println!(
                        "Applied: {} memories recorded, {} flags set, {} skipped.",
                        report.recorded.len(),
                        report.flags_set.len(),
                        report.flags_skipped.len()
                    );
                    last_encounter = None;
                }
                None => println!("Nothing to apply. Preview an encounter first."),
            },
            "recall" => {
                if parts.len() < 3 {
                    println!("Usage: recall <agent> <location> [keyword]");
                    continue;
                }
                let agent = AgentId::new(parts[1]);
                let context = EventContext::at(parts[2]);
                let mut triggers = vec![RecallTrigger::location(parts[2])];
                if let Some(word) = parts.get(3) {
                    triggers.push(RecallTrigger::keyword(*word));
                }
                let memories = session.recall(&agent, &context, &triggers);
                if memories.is_empty() {
                    println!("Nothing comes to mind.");
                }
                for memory in memories {
                    println!(
                        "  {:.2}  {} with {} at {} ({}) - {}",
                        memory.relevance_score,
                        memory.event.kind,
                        other_party(&memory.event.agent_a, &memory.event.agent_b, &agent),
                        memory.event.context.location,
                        memory.trigger_reason,
                        memory.suggested_dialogue.unwrap_or_default()
                    );
                }
            }
            "relations" => {
                if parts.len() < 2 {
                    println!("Usage: relations <agent>");
                    continue;
                }
                let agent = AgentId::new(parts[1]);
                let records = session.agent_relationships(&agent);
                if records.is_empty() {
                    println!("{} has no relationships yet.", agent);
                }
                for record in records {
                    println!(
                        "  {:<12} trust {:+.3}  coop {}  betrayals {}  {}  ({} significant, {} this run)",
                        record.pair.other(&agent).map(|a| a.as_str()).unwrap_or("?"),
                        record.overall_trust_level,
                        record.cooperation_count,
                        record.betrayal_count,
                        record.relationship_trajectory.name(),
                        record.significant_events.len(),
                        record.current_run_events.len()
                    );
                }
            }
            "newrun" => {
                let run = session.start_new_run();
                last_encounter = None;
                println!("Started run {}", run);
            }
            "save" => match session.save() {
                Ok(()) => println!("Saved {} events.", session.ledger().len()),
                Err(e) => println!("ERROR: {}", e),
            },
            "load" => match session.load() {
                Ok(true) => println!("Loaded {} events.", session.ledger().len()),
                Ok(false) => println!("Nothing saved yet."),
                Err(e) => println!("ERROR: {}", e),
            },
            _ => println!("Unknown command: {}. Type 'help' for commands.", cmd),
        }
    }
}

fn with_seed(mut config: AllianceConfig, seed: Option<u64>) -> AllianceConfig {
    if let Some(seed) = seed {
        config.encounters.seed = seed;
        config.bus.seed = seed;
    }
    config
}

fn attach_store(builder: AllianceSessionBuilder, path: Option<&str>) -> AllianceSessionBuilder {
    match path {
        Some(path) => builder.snapshot_store(RonFileStore::new(path)),
        None => builder.snapshot_store(MemoryStore::new()),
    }
}

fn other_party<'a>(a: &'a AgentId, b: &'a AgentId, me: &AgentId) -> &'a AgentId {
    if a == me {
        b
    } else {
        a
    }
}

fn print_encounter(encounter: &Encounter) {
    println!(
        "\n--- {} ({}) trust impact {:+.2} ---",
        encounter.kind,
        encounter.trigger_conditions.join(", "),
        encounter.trust_impact
    );
    for line in &encounter.dialogue {
        let marker = if line.memory_ref.is_some() { " *" } else { "" };
        println!("{:>10}: {}{}", line.speaker.as_str(), line.text, marker);
    }
    println!("Outcomes:");
    for outcome in &encounter.outcomes {
        match outcome {
            EncounterOutcome::NewMemory {
                kind, intensity, ..
            } => println!("  new memory: {} ({:.2})", kind, intensity),
            EncounterOutcome::TrustIncreased(by) => println!("  trust +{:.2}", by),
            EncounterOutcome::TrustDecreased(by) => println!("  trust -{:.2}", by),
            EncounterOutcome::SetFlag { key, value } => println!("  flag {} = {:?}", key, value),
        }
    }
    println!("--- 'apply' to commit ---\n");
}

fn print_usage() {
    println!("Usage: encounter_preview [--config <path>] [--phrasebook <path>] [--voices <path>]");
    println!("                         [--save <path>] [--seed <n>] [-v | -vv]");
}

fn print_help() {
    println!("Commands:");
    println!("  record <kind> <a> <b> <location> <intensity> [description]");
    println!("  encounter <a> <b> <location> [kind] [+observer]");
    println!("  apply                          commit the last previewed encounter");
    println!("  recall <agent> <location> [keyword]");
    println!("  relations <agent>");
    println!("  newrun                         start a new playthrough");
    println!("  save | load                    write or read the snapshot");
    println!("  help | quit");
}
