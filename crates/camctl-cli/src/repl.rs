//! REPL – the interactive operator shell.
//!
//! Supported slash-commands:
//!   /help                  – show this list
//!   /connect, /disconnect  – open / close the camera
//!   /start, /stop          – start / stop continuous acquisition
//!   /status                – session state and cached properties
//!   /stats                 – capture counters
//!   /info                  – model identifier read from the device
//!   /get <property|all>    – read a property (device-backed ones are refreshed)
//!   /set <property> <val>  – write a property
//!   /reset                 – restore factory defaults
//!   /frame                 – summarise the latest frame
//!   /quit | /exit          – disconnect and leave

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camctl_runtime::CameraSession;
use camctl_types::{AutoMode, CamError, ChannelLevels, LightSourcePreset, RgbFrame};

// ─────────────────────────────────────────────────────────────────────────────
// Command model
// ─────────────────────────────────────────────────────────────────────────────

/// A camera property addressable from the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Exposure,
    ExposureAuto,
    Gain,
    GainAuto,
    Sharpness,
    Gamma,
    LightSource,
    WhiteBalance,
    Width,
    Height,
    Levels,
    Negative,
    Saturation,
    ContinuousAwb,
}

impl Property {
    pub const ALL: [Property; 14] = [
        Property::Exposure,
        Property::ExposureAuto,
        Property::Gain,
        Property::GainAuto,
        Property::Sharpness,
        Property::Gamma,
        Property::LightSource,
        Property::WhiteBalance,
        Property::Width,
        Property::Height,
        Property::Levels,
        Property::Negative,
        Property::Saturation,
        Property::ContinuousAwb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::Exposure => "exposure",
            Property::ExposureAuto => "exposure_auto",
            Property::Gain => "gain",
            Property::GainAuto => "gain_auto",
            Property::Sharpness => "sharpness",
            Property::Gamma => "gamma",
            Property::LightSource => "light",
            Property::WhiteBalance => "wb",
            Property::Width => "width",
            Property::Height => "height",
            Property::Levels => "levels",
            Property::Negative => "negative",
            Property::Saturation => "saturation",
            Property::ContinuousAwb => "awb",
        }
    }

    pub fn parse(name: &str) -> Option<Property> {
        let name = name.to_ascii_lowercase();
        let found = match name.as_str() {
            "exposure" | "exposure_time" | "exposure_us" => Property::Exposure,
            "exposure_auto" | "ae" => Property::ExposureAuto,
            "gain" | "gain_db" => Property::Gain,
            "gain_auto" | "ag" => Property::GainAuto,
            "sharpness" => Property::Sharpness,
            "gamma" => Property::Gamma,
            "light" | "light_source" => Property::LightSource,
            "wb" | "white_balance" => Property::WhiteBalance,
            "width" => Property::Width,
            "height" => Property::Height,
            "levels" | "rgb" => Property::Levels,
            "negative" => Property::Negative,
            "saturation" | "color_saturation" => Property::Saturation,
            "awb" | "continuous_awb" => Property::ContinuousAwb,
            _ => return None,
        };
        Some(found)
    }
}

/// A value to write to one property.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Exposure(u32),
    ExposureAuto(AutoMode),
    Gain(f64),
    GainAuto(AutoMode),
    Sharpness(f64),
    Gamma(f64),
    LightSource(LightSourcePreset),
    WhiteBalance(AutoMode),
    Width(u32),
    Height(u32),
    Levels(ChannelLevels),
    Negative(bool),
    Saturation(u8),
    ContinuousAwb(bool),
}

impl Setting {
    pub fn parse(property: Property, args: &[&str]) -> Result<Setting, String> {
        let one = || match args {
            [v] => Ok(*v),
            _ => Err(format!("{} takes exactly one value", property.name())),
        };
        let number = |v: &str| v.parse::<f64>().map_err(|_| format!("'{v}' is not a number"));
        let integer = |v: &str| v.parse::<u32>().map_err(|_| format!("'{v}' is not an integer"));
        let mode = |v: &str| v.parse::<AutoMode>().map_err(|e| e.to_string());
        let byte = |v: &str| v.parse::<u8>().map_err(|_| format!("'{v}' is not in 0..=255"));

        Ok(match property {
            Property::Exposure => Setting::Exposure(integer(one()?)?),
            Property::ExposureAuto => Setting::ExposureAuto(mode(one()?)?),
            Property::Gain => Setting::Gain(number(one()?)?),
            Property::GainAuto => Setting::GainAuto(mode(one()?)?),
            Property::Sharpness => Setting::Sharpness(number(one()?)?),
            Property::Gamma => Setting::Gamma(number(one()?)?),
            Property::LightSource => Setting::LightSource(
                one()?
                    .parse::<LightSourcePreset>()
                    .map_err(|e| e.to_string())?,
            ),
            Property::WhiteBalance => Setting::WhiteBalance(mode(one()?)?),
            Property::Width => Setting::Width(integer(one()?)?),
            Property::Height => Setting::Height(integer(one()?)?),
            Property::Levels => match args {
                [r, g, b] => Setting::Levels(ChannelLevels {
                    red: byte(*r)?,
                    green: byte(*g)?,
                    blue: byte(*b)?,
                }),
                _ => return Err("levels takes three values: <red> <green> <blue>".to_string()),
            },
            Property::Negative => Setting::Negative(parse_flag(one()?)?),
            Property::Saturation => Setting::Saturation(byte(one()?)?),
            Property::ContinuousAwb => Setting::ContinuousAwb(parse_flag(one()?)?),
        })
    }
}

fn parse_flag(v: &str) -> Result<bool, String> {
    match v.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(format!("'{v}' is not on/off")),
    }
}

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Connect,
    Disconnect,
    Start,
    Stop,
    Status,
    Stats,
    Info,
    Get(Property),
    GetAll,
    Set(Setting),
    Reset,
    Frame,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".to_string());
        };
        let rest: Vec<&str> = words.collect();

        let bare = |cmd: Command| {
            if rest.is_empty() {
                Ok(cmd)
            } else {
                Err(format!("{head} takes no arguments"))
            }
        };

        match head {
            "/help" => bare(Command::Help),
            "/connect" => bare(Command::Connect),
            "/disconnect" => bare(Command::Disconnect),
            "/start" => bare(Command::Start),
            "/stop" => bare(Command::Stop),
            "/status" => bare(Command::Status),
            "/stats" => bare(Command::Stats),
            "/info" => bare(Command::Info),
            "/reset" => bare(Command::Reset),
            "/frame" => bare(Command::Frame),
            "/quit" | "/exit" => bare(Command::Quit),
            "/get" => match rest.as_slice() {
                ["all"] | [] => Ok(Command::GetAll),
                [name] => Property::parse(name)
                    .map(Command::Get)
                    .ok_or_else(|| format!("unknown property '{name}'")),
                _ => Err("usage: /get <property|all>".to_string()),
            },
            "/set" => match rest.split_first() {
                Some((name, args)) => {
                    let property =
                        Property::parse(name).ok_or_else(|| format!("unknown property '{name}'"))?;
                    Setting::parse(property, args).map(Command::Set)
                }
                None => Err("usage: /set <property> <value>".to_string()),
            },
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &CameraSession, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "camctl>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => {
                if let Err(e) = execute(session, cmd) {
                    println!("{} {}", "✗".red().bold(), e.to_string().red());
                }
            }
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg.yellow(),
                "/help".bold()
            ),
        }
    }
}

fn execute(session: &CameraSession, cmd: Command) -> Result<(), CamError> {
    match cmd {
        Command::Help => cmd_help(),
        Command::Connect => {
            session.connect()?;
            ok(&format!(
                "Connected to {}",
                session.snapshot().model.unwrap_or_default().bold()
            ));
        }
        Command::Disconnect => {
            session.disconnect()?;
            ok("Disconnected");
        }
        Command::Start => {
            session.start_acquisition()?;
            if session.is_acquiring() {
                ok("Acquisition running");
            } else {
                println!("  {}", "Not connected; nothing to start.".yellow());
            }
        }
        Command::Stop => {
            session.stop_acquisition()?;
            ok("Acquisition stopped");
        }
        Command::Status => cmd_status(session),
        Command::Stats => cmd_stats(session),
        Command::Info => {
            let model = session.camera_info()?;
            println!("  Model : {}", model.bold());
        }
        Command::Get(property) => {
            let value = read_property(session, property)?;
            println!("  {:<14} {}", property.name().cyan(), value);
        }
        Command::GetAll => {
            session.refresh_properties()?;
            for property in Property::ALL {
                let value = read_property(session, property)?;
                println!("  {:<14} {}", property.name().cyan(), value);
            }
        }
        Command::Set(setting) => {
            apply_setting(session, setting)?;
            ok("Updated");
        }
        Command::Reset => {
            session.reset_factory_defaults()?;
            ok("Factory defaults restored");
        }
        Command::Frame => match session.snapshot_last_frame() {
            Some(frame) => print_frame(&frame),
            None => println!("  {}", "No frame captured yet.".dimmed()),
        },
        Command::Quit => {}
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Property plumbing
// ─────────────────────────────────────────────────────────────────────────────

fn read_property(session: &CameraSession, property: Property) -> Result<String, CamError> {
    Ok(match property {
        Property::Exposure => format!("{} µs", session.exposure_time_us()?),
        Property::ExposureAuto => session.exposure_auto()?.to_string(),
        Property::Gain => format!("{:.2} dB", session.gain_db()?),
        Property::GainAuto => session.gain_auto()?.to_string(),
        Property::Sharpness => format!("{:.3}", session.sharpness()?),
        Property::Gamma => format!("{:.3}", session.gamma()?),
        Property::LightSource => session.light_source()?.to_string(),
        Property::WhiteBalance => session.white_balance_auto()?.to_string(),
        Property::Width => session.frame_width()?.to_string(),
        Property::Height => session.frame_height()?.to_string(),
        Property::Levels => {
            let l = session.levels()?;
            format!("r={} g={} b={}", l.red, l.green, l.blue)
        }
        Property::Negative => on_off(session.negative()?),
        Property::Saturation => session.color_saturation()?.to_string(),
        Property::ContinuousAwb => on_off(session.continuous_awb()?),
    })
}

fn apply_setting(session: &CameraSession, setting: Setting) -> Result<(), CamError> {
    match setting {
        Setting::Exposure(v) => session.set_exposure_time_us(v),
        Setting::ExposureAuto(m) => session.set_exposure_auto(m),
        Setting::Gain(v) => session.set_gain_db(v),
        Setting::GainAuto(m) => session.set_gain_auto(m),
        Setting::Sharpness(v) => session.set_sharpness(v),
        Setting::Gamma(v) => session.set_gamma(v),
        Setting::LightSource(p) => session.set_light_source(p),
        Setting::WhiteBalance(m) => session.set_white_balance_auto(m),
        Setting::Width(v) => session.set_frame_width(v),
        Setting::Height(v) => session.set_frame_height(v),
        Setting::Levels(l) => session.set_levels(l),
        Setting::Negative(b) => session.set_negative(b),
        Setting::Saturation(v) => session.set_color_saturation(v),
        Setting::ContinuousAwb(b) => session.set_continuous_awb(b),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "camctl Commands".bold().underline());
    println!("  {}  – open / close the camera", "/connect  /disconnect".bold().cyan());
    println!("  {}            – start / stop acquisition", "/start  /stop".bold().cyan());
    println!("  {}         – session state and cached properties", "/status  /stats".bold().cyan());
    println!("  {}                    – model identifier", "/info".bold().cyan());
    println!("  {}     – read a property", "/get <property|all>".bold().cyan());
    println!("  {}  – write a property", "/set <property> <value>".bold().cyan());
    println!("  {}                   – restore factory defaults", "/reset".bold().cyan());
    println!("  {}                   – summarise the latest frame", "/frame".bold().cyan());
    println!("  {}            – exit", "/quit  /exit".bold().cyan());
    println!();
    let names: Vec<&str> = Property::ALL.iter().map(|p| p.name()).collect();
    println!("  Properties: {}", names.join(", ").dimmed());
    println!(
        "  Modes: {}   Light: {}",
        "off once continuous".dimmed(),
        "off daylight5000k daylight6500k tungsten2800k".dimmed()
    );
    println!();
}

fn cmd_status(session: &CameraSession) {
    let snap = session.snapshot();
    let state = match (snap.connected, snap.acquiring) {
        (false, _) => "disconnected".red(),
        (true, false) => "connected (idle)".yellow(),
        (true, true) => "acquiring".green(),
    };
    println!("{}", "Session".bold().underline());
    println!("  State      : {state}");
    if let Some(model) = &snap.model {
        println!("  Model      : {}", model.bold());
    }
    let p = &snap.properties;
    println!("  Geometry   : {}x{}", p.width, p.height);
    println!("  Exposure   : {} µs ({})", p.exposure_time_us, p.exposure_auto);
    println!("  Gain       : {:.2} dB ({})", p.gain_db, p.gain_auto);
    println!("  Gamma      : {:.3}   Sharpness: {:.3}", p.gamma, p.sharpness);
    println!("  White bal. : {}   Light: {}", p.white_balance_auto, p.light_source);
    println!(
        "  Levels     : r={} g={} b={}",
        p.levels.red, p.levels.green, p.levels.blue
    );
    println!("  Frames     : {}", snap.frames_captured);
}

fn cmd_stats(session: &CameraSession) {
    let stats = session.stats();
    println!("{}", "Statistics".bold().underline());
    println!("  Frames captured  : {}", stats.frames_captured);
    println!("  Capture failures : {}", stats.capture_failures);
    println!("  Workers spawned  : {}", stats.workers_spawned);
    println!("  Busy timeouts    : {}", stats.busy_timeouts);
}

/// Mean value of each channel.
pub fn channel_means(frame: &RgbFrame) -> (f64, f64, f64) {
    let pixels = frame.data.len() / 3;
    if pixels == 0 {
        return (0.0, 0.0, 0.0);
    }
    let mut sums = [0u64; 3];
    for px in frame.data.chunks_exact(3) {
        sums[0] += px[0] as u64;
        sums[1] += px[1] as u64;
        sums[2] += px[2] as u64;
    }
    let n = pixels as f64;
    (sums[0] as f64 / n, sums[1] as f64 / n, sums[2] as f64 / n)
}

fn print_frame(frame: &RgbFrame) {
    let (r, g, b) = channel_means(frame);
    println!("{}", "Latest frame".bold().underline());
    println!("  Sequence : {}", frame.sequence);
    println!("  Size     : {}x{} ({} bytes)", frame.width, frame.height, frame.data.len());
    println!("  Captured : {}", frame.captured_at.to_rfc3339());
    println!("  Mean RGB : {r:.1} {g:.1} {b:.1}");
}

fn ok(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg);
}

fn on_off(flag: bool) -> String {
    let word = if flag { "on" } else { "off" };
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(Command::parse("/connect"), Ok(Command::Connect));
        assert_eq!(Command::parse("  /stop  "), Ok(Command::Stop));
        assert_eq!(Command::parse("/exit"), Ok(Command::Quit));
        assert!(Command::parse("/start now").is_err());
        assert!(Command::parse("/launch").is_err());
    }

    #[test]
    fn parses_get() {
        assert_eq!(Command::parse("/get"), Ok(Command::GetAll));
        assert_eq!(Command::parse("/get all"), Ok(Command::GetAll));
        assert_eq!(
            Command::parse("/get exposure"),
            Ok(Command::Get(Property::Exposure))
        );
        assert_eq!(Command::parse("/get WB"), Ok(Command::Get(Property::WhiteBalance)));
        assert!(Command::parse("/get focus").is_err());
    }

    #[test]
    fn parses_set_values() {
        assert_eq!(
            Command::parse("/set exposure 20000"),
            Ok(Command::Set(Setting::Exposure(20_000)))
        );
        assert_eq!(
            Command::parse("/set gain_auto continuous"),
            Ok(Command::Set(Setting::GainAuto(AutoMode::Continuous)))
        );
        assert_eq!(
            Command::parse("/set light tungsten2800k"),
            Ok(Command::Set(Setting::LightSource(LightSourcePreset::Tungsten2800K)))
        );
        assert_eq!(
            Command::parse("/set levels 255 128 0"),
            Ok(Command::Set(Setting::Levels(ChannelLevels {
                red: 255,
                green: 128,
                blue: 0
            })))
        );
        assert_eq!(
            Command::parse("/set negative on"),
            Ok(Command::Set(Setting::Negative(true)))
        );
    }

    #[test]
    fn rejects_bad_set_values() {
        assert!(Command::parse("/set").is_err());
        assert!(Command::parse("/set exposure").is_err());
        assert!(Command::parse("/set exposure fast").is_err());
        assert!(Command::parse("/set levels 1 2").is_err());
        assert!(Command::parse("/set levels 1 2 300").is_err());
        assert!(Command::parse("/set gain_auto sometimes").is_err());
        assert!(Command::parse("/set awb maybe").is_err());
    }

    #[test]
    fn every_property_name_parses_back() {
        for p in Property::ALL {
            assert_eq!(Property::parse(p.name()), Some(p));
        }
    }

    #[test]
    fn channel_means_of_a_flat_frame() {
        let frame = RgbFrame {
            width: 2,
            height: 1,
            data: vec![10, 20, 30, 30, 40, 50],
            sequence: 1,
            captured_at: chrono::Utc::now(),
        };
        assert_eq!(channel_means(&frame), (20.0, 30.0, 40.0));

        let empty = RgbFrame {
            data: Vec::new(),
            width: 0,
            height: 0,
            ..frame
        };
        assert_eq!(channel_means(&empty), (0.0, 0.0, 0.0));
    }

    #[test]
    fn shell_commands_drive_a_sim_session() {
        use camctl_hal::SimCamera;
        use camctl_runtime::SessionConfig;

        let session =
            CameraSession::new(Box::new(SimCamera::new("shell-sim")), SessionConfig::default())
                .unwrap();
        execute(&session, Command::Connect).unwrap();
        execute(&session, Command::Set(Setting::Gamma(1.25))).unwrap();
        assert_eq!(session.snapshot().properties.gamma, 1.25);
        assert!(execute(&session, Command::Set(Setting::Gamma(99.0))).is_err());
        execute(&session, Command::GetAll).unwrap();
        execute(&session, Command::Reset).unwrap();
        assert_eq!(session.snapshot().properties.gamma, 1.0);
        execute(&session, Command::Disconnect).unwrap();
        assert_eq!(
            execute(&session, Command::Get(Property::Gamma)).unwrap_err(),
            CamError::NotConnected
        );
    }
}
