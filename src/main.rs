//! steproll - A step sequencer driven from the command line.
//!
//! Each invocation loads the project from the storage directory, applies one
//! command, and saves. Playback runs against a manual clock and logs the
//! notes it would play.
//!
//! # Usage
//!
//! ```bash
//! steproll show
//! steproll toggle 0 4
//! steproll edit 0 add C4 12
//! steproll keys 0 asdf
//! RUST_LOG=info steproll play 64
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use steproll::audio::PlannedNote;
use steproll::pattern::{name_to_note, note_to_name, InstrumentKind, NoteValue, TrackId, STEP_COUNT};
use steproll::storage::now_millis;
use steproll::view::{Gesture, LogView};
use steproll::{App, Config, FileStore, LogVoices, ManualTransport, PianoRollSession};

const DEFAULT_CONFIG_PATH: &str = "steproll.toml";

/// A piano-roll edit applied through an editor session.
enum EditAction {
    Add { pitch: u8, fine_step: usize },
    Remove { pitch: u8, fine_step: usize },
    Division(NoteValue),
    Clear,
}

/// A command run against the loaded main view.
enum MainCommand {
    Show,
    Gesture(Gesture),
    /// Flips mute relative to the stored state.
    Mute(TrackId),
    /// Flips solo relative to the stored state.
    Solo(TrackId),
    Scale { key: String, mode: String },
    Play { steps: usize },
    /// Plays the scale notes mapped to computer-keyboard keys.
    Keys { track: TrackId, keys: String },
}

enum Command {
    Main(MainCommand),
    /// Runs in a piano-roll session instead of the main view.
    Edit { track: TrackId, action: EditAction },
}

/// Command-line options for the application.
struct CliOptions {
    /// Overrides the configured storage directory.
    dir: Option<PathBuf>,
    config: PathBuf,
    command: Command,
}

fn print_help(program: &str) {
    eprintln!("steproll - 32-step sequencer with a piano roll");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] <COMMAND>", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --dir DIR        Storage directory (default from config)");
    eprintln!("  -c, --config FILE    Config file (default {})", DEFAULT_CONFIG_PATH);
    eprintln!("  -h, --help           Print this help message");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  show                          Print all tracks");
    eprintln!("  add                           Add a track");
    eprintln!("  delete <id>                   Delete a track");
    eprintln!("  toggle <id> <step>            Flip one step");
    eprintln!("  mute <id> | solo <id>         Flip mute or solo");
    eprintln!("  instrument <id> <tag>         kick snare hihat synth fm am noise");
    eprintln!("  clear                         Clear every step pattern");
    eprintln!("  bpm <n>                       Set tempo");
    eprintln!("  scale <key> <mode>            Set key and mode (major, minor)");
    eprintln!("  play [steps]                  Play with a manual clock (default {})", STEP_COUNT);
    eprintln!("  keys <id> <keys>              Preview scale notes on keys a-l and q-p");
    eprintln!("  edit <id> add|remove <pitch> <fine-step>");
    eprintln!("  edit <id> division 4n|8n|16n|32n");
    eprintln!("  edit <id> clear               Edit a track's piano roll");
}

fn parse_track(arg: Option<&String>) -> Result<TrackId> {
    let raw = arg.context("missing track id")?;
    let id = raw
        .parse()
        .with_context(|| format!("invalid track id: {}", raw))?;
    Ok(TrackId(id))
}

fn parse_number<T: std::str::FromStr>(arg: Option<&String>, what: &str) -> Result<T> {
    let raw = arg.with_context(|| format!("missing {}", what))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid {}: {}", what, raw))
}

/// Accepts a MIDI number or a note name such as "C4" or "F#3".
fn parse_pitch(arg: Option<&String>) -> Result<u8> {
    let raw = arg.context("missing pitch")?;
    match raw.parse::<u8>() {
        Ok(n) if n <= 127 => Ok(n),
        Ok(_) => bail!("pitch out of range: {}", raw),
        Err(_) => name_to_note(raw).with_context(|| format!("invalid pitch: {}", raw)),
    }
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("steproll");
        let mut dir = None;
        let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
        let mut rest = Vec::new();
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--dir" | "-d" => {
                    i += 1;
                    dir = Some(PathBuf::from(args.get(i).context("--dir requires a path")?));
                }
                "--config" | "-c" => {
                    i += 1;
                    config = PathBuf::from(args.get(i).context("--config requires a path")?);
                }
                "--help" | "-h" => {
                    print_help(program);
                    std::process::exit(0);
                }
                other => rest.push(other.to_string()),
            }
            i += 1;
        }

        let command = match rest.first().map(String::as_str) {
            None | Some("show") => Command::Main(MainCommand::Show),
            Some("add") => Command::Main(MainCommand::Gesture(Gesture::AddTrack)),
            Some("delete") => Command::Main(MainCommand::Gesture(Gesture::DeleteTrack(parse_track(
                rest.get(1),
            )?))),
            Some("toggle") => Command::Main(MainCommand::Gesture(Gesture::ToggleStep(
                parse_track(rest.get(1))?,
                parse_number(rest.get(2), "step")?,
            ))),
            Some("mute") => Command::Main(MainCommand::Mute(parse_track(rest.get(1))?)),
            Some("solo") => Command::Main(MainCommand::Solo(parse_track(rest.get(1))?)),
            Some("instrument") => {
                let id = parse_track(rest.get(1))?;
                let tag = rest.get(2).context("missing instrument")?;
                let kind: InstrumentKind = tag.parse().map_err(anyhow::Error::msg)?;
                Command::Main(MainCommand::Gesture(Gesture::ChangeInstrument(id, kind)))
            }
            Some("clear") => Command::Main(MainCommand::Gesture(Gesture::ClearAll)),
            Some("bpm") => Command::Main(MainCommand::Gesture(Gesture::SetBpm(parse_number(
                rest.get(1),
                "bpm",
            )?))),
            Some("scale") => Command::Main(MainCommand::Scale {
                key: rest.get(1).context("missing key")?.clone(),
                mode: rest.get(2).cloned().unwrap_or_else(|| "major".to_string()),
            }),
            Some("play") => Command::Main(MainCommand::Play {
                steps: match rest.get(1) {
                    Some(_) => parse_number(rest.get(1), "step count")?,
                    None => STEP_COUNT,
                },
            }),
            Some("keys") => Command::Main(MainCommand::Keys {
                track: parse_track(rest.get(1))?,
                keys: rest.get(2).context("missing keys")?.clone(),
            }),
            Some("edit") => {
                let track = parse_track(rest.get(1))?;
                let action = match rest.get(2).map(String::as_str) {
                    Some("add") => EditAction::Add {
                        pitch: parse_pitch(rest.get(3))?,
                        fine_step: parse_number(rest.get(4), "fine step")?,
                    },
                    Some("remove") => EditAction::Remove {
                        pitch: parse_pitch(rest.get(3))?,
                        fine_step: parse_number(rest.get(4), "fine step")?,
                    },
                    Some("division") => {
                        let tag = rest.get(3).context("missing division")?;
                        EditAction::Division(tag.parse::<NoteValue>().map_err(anyhow::Error::msg)?)
                    }
                    Some("clear") => EditAction::Clear,
                    _ => bail!("edit needs add, remove, division or clear"),
                };
                Command::Edit { track, action }
            }
            Some(other) => {
                eprintln!("Unknown command: {}", other);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        };

        Ok(Self { dir, config, command })
    }
}

fn show(app: &App<FileStore, LogVoices, ManualTransport>) {
    println!(
        "{} BPM | {} | default division {}",
        app.scheduler().tempo(),
        app.scale(),
        app.division()
    );
    for track in app.tracks().all_tracks() {
        let grid: String = (0..STEP_COUNT)
            .map(|step| match (track.is_step_active(step), step % 4 == 0) {
                (true, _) => 'x',
                (false, true) => '|',
                (false, false) => '.',
            })
            .collect();
        let flags = format!(
            "{}{}",
            if track.muted { "M" } else { " " },
            if track.soloed { "S" } else { " " }
        );
        println!(
            "{:>2} {:<9} {:<6} {} {} ({} notes at {})",
            track.id,
            track.name,
            track.instrument.as_str(),
            flags,
            grid,
            track.detailed_notes.len(),
            track.division
        );
    }
    if let Some(status) = &app.status_message {
        println!("{}", status);
    }
}

fn edit(config: &Config, track: TrackId, action: EditAction) -> Result<()> {
    let mut store = FileStore::open(&config.storage_dir)
        .with_context(|| format!("Failed to open {}", config.storage_dir.display()))?;
    let mut session = PianoRollSession::open(&store, track, config);

    match action {
        EditAction::Add { pitch, fine_step } => {
            if !session.add_note(pitch, fine_step) {
                bail!(
                    "fine step {} is outside the {} grid",
                    fine_step,
                    session.division()
                );
            }
        }
        EditAction::Remove { pitch, fine_step } => {
            if !session.remove_note(pitch, fine_step) {
                println!("No {} at fine step {}", note_to_name(pitch), fine_step);
            }
        }
        EditAction::Division(division) => session.set_division(division),
        EditAction::Clear => session.clear(),
    }

    session
        .save(&mut store, now_millis())
        .context("Failed to save piano roll")?;

    let (steps, pitches) = session.coarse_pattern();
    let summary: Vec<String> = steps
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(i, _)| match pitches[i] {
            Some(p) => format!("{}:{}", i, note_to_name(p)),
            None => i.to_string(),
        })
        .collect();
    println!(
        "Track {}: {} notes at {}, steps [{}]",
        track,
        session.notes().len(),
        session.division(),
        summary.join(" ")
    );
    Ok(())
}

fn print_note(prefix: &str, note: &PlannedNote) {
    let pitch = note.pitch.map(note_to_name).unwrap_or_else(|| "-".into());
    println!(
        "{} track {} {:<4} {:>3} +{:.3}s",
        prefix,
        note.track,
        pitch,
        note.duration.as_str(),
        note.offset
    );
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.dir {
        config.storage_dir = dir;
    }

    let command = match cli.command {
        Command::Main(command) => command,
        Command::Edit { track, action } => return edit(&config, track, action),
    };

    let store = FileStore::open(&config.storage_dir)
        .with_context(|| format!("Failed to open {}", config.storage_dir.display()))?;
    let mut app = App::new(
        config,
        store,
        LogVoices::new(),
        ManualTransport::new(),
        Box::new(LogView),
    );

    match command {
        MainCommand::Show => {}
        MainCommand::Gesture(gesture) => {
            app.handle(gesture);
        }
        MainCommand::Mute(id) => {
            let muted = app.tracks().get(id).map(|t| !t.muted).unwrap_or(false);
            app.handle(Gesture::SetMute(id, muted));
        }
        MainCommand::Solo(id) => {
            let soloed = app.tracks().get(id).map(|t| !t.soloed).unwrap_or(false);
            app.handle(Gesture::SetSolo(id, soloed));
        }
        MainCommand::Scale { key, mode } => {
            app.handle(Gesture::SetKey(key));
            app.handle(Gesture::SetMode(mode));
        }
        MainCommand::Play { steps } => {
            app.handle(Gesture::SetLoop(steps > STEP_COUNT));
            app.handle(Gesture::Play);
            for _ in 0..steps {
                let Some(step) = app.transport_mut().tick() else {
                    break;
                };
                for note in app.tick(step) {
                    print_note(&format!("step {:>2}", step), &note);
                }
            }
            app.handle(Gesture::Stop);
        }
        MainCommand::Keys { track, keys } => {
            for key in keys.chars() {
                match app.preview_key(track, key) {
                    Some(note) => print_note(&format!("key {}", key), &note),
                    None => println!("key {} plays nothing", key),
                }
            }
        }
    }

    show(&app);
    Ok(())
}
