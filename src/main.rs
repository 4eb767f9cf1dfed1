use anyhow::{Result, bail};
use clap::Parser;
use log::info;
use simplelog::*;

use std::path::PathBuf;
use std::time::Duration;

use joymux_engine::action::{Action, CursorAxis, LongPress, ModeAction};
use joymux_engine::controller::{ControllerInfo, axis as physical};
use joymux_engine::frontend::Frontend;
use joymux_engine::sim::{ScriptedController, SimEvent, parse_script};
use joymux_engine::{
    Engine, KeyStroke, Mode, OutputParams, Profile, VIRTUAL_AXIS_COUNT, VirtualAxis,
};

#[derive(Parser, Debug)]
#[command(author, version, verbatim_doc_comment)]
/// joymux: remap a game controller onto a virtual joystick, mouse and
/// keyboard.
///
/// This binary replays a simulation script against the remapping engine and
/// logs the virtual-device state it produces, which makes profile behaviour
/// inspectable without hardware. The hardware and virtual-device front ends
/// drive the same engine through its collaborator traits.
struct Args {
    /// Simulation script to replay. If not specified, defaults to demo.sim
    /// in the current working directory and
    /// '$XDG_CONFIG_HOME/joymux/demo.sim'.
    #[arg(short, long, verbatim_doc_comment)]
    sim: Option<PathBuf>,

    /// Poll interval in milliseconds.
    #[arg(short, long, default_value_t = 16)]
    interval: u64,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging; implies --debug as well.
    #[arg(short, long)]
    trace: bool,
}

struct ValidatedArgs {
    sim_path: PathBuf,
    interval: u64,
}

fn default_sim() -> Option<PathBuf> {
    let default = PathBuf::from("demo.sim");
    if default.is_file() {
        return Some(default);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let fallback = config_dir.join("joymux").join("demo.sim");
        if fallback.is_file() {
            return Some(fallback);
        }
    }

    None
}

/// Parse CLI arguments and initialize logging.
fn cli_init() -> Result<ValidatedArgs> {
    let args = Args::parse();

    let log_lvl = match (args.debug, args.trace) {
        (_, true) => LevelFilter::Trace,
        (true, false) => LevelFilter::Debug,
        (false, false) => LevelFilter::Info,
    };

    let mut log_cfg = ConfigBuilder::new();
    if let Err(e) = log_cfg.set_time_offset_to_local() {
        eprintln!("WARNING: could not set log TZ to local: {e:?}");
    };
    log_cfg.set_time_format_rfc3339();
    CombinedLogger::init(vec![TermLogger::new(
        log_lvl,
        log_cfg.build(),
        TerminalMode::Mixed,
        ColorChoice::AlwaysAnsi,
    )])
    .expect("logger can init");
    log::info!("joymux v{} starting", env!("CARGO_PKG_VERSION"));

    let Some(sim_path) = args.sim.or_else(default_sim) else {
        bail!("No simulation script provided\nFor more info, pass the `-h` or `--help` flags.");
    };
    if !sim_path.is_file() {
        bail!("Could not find the simulation script ({})", sim_path.display());
    }
    if args.interval == 0 {
        bail!("Poll interval must be at least 1 ms");
    }

    Ok(ValidatedArgs {
        sim_path,
        interval: args.interval,
    })
}

struct SimFrontend;

impl Frontend for SimFrontend {
    fn request_controller_swap(&self, target: ControllerInfo) {
        info!("hot swap requested to '{}' ({})", target.name, target.id);
    }
}

/// The built-in demonstration profile: sticks and right trigger mapped onto
/// virtual axes, face buttons passed through, and a held "pointer layer" on
/// button 4 that turns the right stick into the mouse cursor.
fn demo_profile() -> Profile {
    let mut profile = Profile::new();

    let default_mode = &mut profile.modes_mut()[0];
    default_mode.add_axis_action(
        physical::LEFT_X as u16,
        Action::axis_to_axis(VirtualAxis::X),
    );
    default_mode.add_axis_action(
        physical::LEFT_Y as u16,
        Action::axis_to_axis(VirtualAxis::Y),
    );
    default_mode.add_axis_action(
        physical::RIGHT_X as u16,
        Action::axis_to_axis(VirtualAxis::Rx),
    );
    default_mode.add_axis_action(
        physical::RIGHT_Y as u16,
        Action::axis_to_axis(VirtualAxis::Ry),
    );
    default_mode.add_axis_action(
        physical::RIGHT_TRIGGER as u16,
        Action::AxisToAxis {
            virtual_axis: VirtualAxis::Rz,
            invert: false,
            haptic_feedback: true,
            detent: Some(0.0),
        },
    );
    default_mode.add_axis_action(physical::LEFT_TRIGGER as u16, Action::axis_to_button(6));
    for button in 0..4 {
        default_mode.add_button_action(button, Action::button_to_button(button));
    }
    // Button 5 types a keystroke when held long, clicks through otherwise.
    default_mode.add_button_action(5, Action::button_to_button(5));
    default_mode.add_button_action(
        5,
        Action::ButtonToKeyStroke {
            key_stroke: KeyStroke::new(vec![57], vec![]),
            down_up: true,
            was_up: false,
            long_press: LongPress::classified(),
        },
    );

    let mut pointer = Mode::new("pointer layer");
    pointer.add_axis_action(
        physical::RIGHT_X as u16,
        Action::AxisToCursor {
            cursor_axis: CursorAxis::X,
            sensitivity: 900.0,
            deadzone: 0.15,
            remainder: 0.0,
        },
    );
    pointer.add_axis_action(
        physical::RIGHT_Y as u16,
        Action::AxisToCursor {
            cursor_axis: CursorAxis::Y,
            sensitivity: 900.0,
            deadzone: 0.15,
            remainder: 0.0,
        },
    );
    pointer.add_axis_action(
        physical::RIGHT_TRIGGER as u16,
        Action::AxisToScroll {
            clicks: 4,
            deadzone: 0.2,
            invert: false,
        },
    );
    pointer.add_button_action(
        0,
        Action::ButtonToMouseButton {
            mouse_button: 0,
            down_up: false,
            was_up: false,
            initiator: false,
            long_press: LongPress::default(),
        },
    );
    profile.add_mode_action(4, ModeAction::new(pointer.uuid()));
    profile.add_mode(pointer);

    profile
}

/// Last reported output state, for logging transitions only.
struct OutputSnapshot {
    axes: [i32; VIRTUAL_AXIS_COUNT],
    buttons: Vec<bool>,
    mouse_buttons: Vec<u8>,
    scroll_clicks: i32,
}

fn drain_and_report(engine: &Engine, prev: &mut OutputSnapshot) {
    let shared = engine.shared();

    for virtual_axis in VirtualAxis::ALL {
        let value = engine.axis_value(virtual_axis);
        if value != prev.axes[virtual_axis.index()] {
            info!("axis {virtual_axis:?} -> {value}");
            prev.axes[virtual_axis.index()] = value;
        }
    }

    for (index, (&now, then)) in engine
        .buttons()
        .iter()
        .zip(prev.buttons.iter_mut())
        .enumerate()
    {
        if now != *then {
            info!(
                "virtual button {index} {}",
                if now { "pressed" } else { "released" }
            );
            *then = now;
        }
    }

    let mouse_buttons = shared.down_mouse_buttons();
    for &button in &mouse_buttons {
        if !prev.mouse_buttons.contains(&button) {
            info!("mouse button {button} pressed");
        }
    }
    for &button in &prev.mouse_buttons {
        if !mouse_buttons.contains(&button) {
            info!("mouse button {button} released");
        }
    }
    prev.mouse_buttons = mouse_buttons;

    for button in shared.take_down_up_mouse_buttons() {
        info!("mouse button {button} clicked");
    }
    for key_stroke in shared.take_down_up_key_strokes() {
        info!("keystroke tapped: {key_stroke:?}");
    }

    let (dx, dy) = shared.take_cursor_delta();
    if (dx, dy) != (0, 0) {
        info!("cursor moved by ({dx}, {dy})");
    }

    let scroll_clicks = shared.scroll_clicks();
    if scroll_clicks != prev.scroll_clicks {
        if scroll_clicks != 0 {
            info!("scrolling {scroll_clicks} clicks per tick");
        }
        prev.scroll_clicks = scroll_clicks;
    }
}

fn main_impl() -> Result<()> {
    let args = cli_init()?;

    let script = std::fs::read_to_string(&args.sim_path)?;
    let events = parse_script(&script)?;
    info!(
        "replaying {} events from {} at {} ms per tick",
        events.len(),
        args.sim_path.display(),
        args.interval
    );

    let info = ControllerInfo {
        id: 0,
        name: "scripted gamepad".into(),
    };
    let controller = ScriptedController::new(info.clone());

    let mut engine = Engine::new(
        info,
        Box::new(controller.clone()),
        Box::new(SimFrontend),
    );
    engine.attach_output(OutputParams {
        min_axis_value: -32768,
        max_axis_value: 32767,
        n_buttons: 32,
        poll_interval_ms: args.interval,
    });
    if !engine.set_profile(demo_profile()) {
        bail!("the demo profile failed validation");
    }
    engine.init();

    let mut prev = OutputSnapshot {
        axes: engine.axes(),
        buttons: engine.buttons().to_vec(),
        mouse_buttons: Vec::new(),
        scroll_clicks: 0,
    };

    for event in events {
        match event {
            SimEvent::Wait(ms) => {
                for _ in 0..(ms / args.interval).max(1) {
                    if !engine.poll() {
                        bail!("controller sample could not be obtained, stopping");
                    }
                    drain_and_report(&engine, &mut prev);
                    std::thread::sleep(Duration::from_millis(args.interval));
                }
            }
            other => controller.apply(other),
        }
    }

    info!("simulation finished");
    Ok(())
}

fn main() {
    let ret = main_impl();
    if let Err(ref e) = ret {
        log::error!("{e}\n");
        std::process::exit(1);
    }
}
