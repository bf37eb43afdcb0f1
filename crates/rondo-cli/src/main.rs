//! rondo CLI: an interactive terminal jukebox.
//!
//! usage: rondo [options] [file...]
//!
//! Files on the command line are appended to the saved queue and playback
//! starts right away. Commands are read from stdin, one per line:
//!
//!   add <file>      (a)   Append a file to the queue
//!   playnext <file> (pn)  Put a file at the front of the queue
//!   play / pause          Resume / pause
//!   toggle          (p)   Toggle pause (an empty line does the same)
//!   skip            (n)   Next track
//!   seek <±secs>    (f)   Seek relative to the current position
//!   vol <±percent>  (v)   Change volume
//!   loop            (l)   Toggle loop mode
//!   shuffle               Shuffle the queue
//!   del <index>     (d)   Remove a queued track
//!   clear                 Empty the queue
//!   list            (ls)  Show the queue
//!   now                   Show the current track
//!   quit            (q)   Save the queue and exit

use std::io::{BufRead, Write};
use std::process;
use std::sync::Arc;

use rondo_core::effects::audio::LocalBackend;
use rondo_core::effects::daemon::DaemonBackend;
use rondo_core::effects::AudioBackend;
use rondo_core::progress::format_time;
use rondo_core::volume::volume_to_percent;
use rondo_core::{
    BackendKind, Config, Jukebox, PlaybackCommand, PlaybackEngine, PlaybackState, PlayerError,
    PlayerResult, Progress, ProgressReporter, Queue, Track,
};

const BAR_WIDTH: usize = 30;

#[derive(Debug, Default)]
struct Options {
    daemon: Option<String>,
    looping: bool,
    no_persist: bool,
    volume: Option<i64>,
    help: bool,
    files: Vec<String>,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("rondo: {}", e);
            print_usage();
            process::exit(2);
        }
    };
    if opts.help {
        print_usage();
        return;
    }

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rondo: {}", e);
            process::exit(1);
        }
    };
    apply_options(&mut config, &opts);

    let backend = match build_backend(&config) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("rondo: no audio output: {}", e);
            eprintln!("rondo: {}", e);
            process::exit(1);
        }
    };

    let engine = Arc::new(PlaybackEngine::new(backend, config.initial_volume()));
    let queue = if config.persist_queue {
        Queue::restore(&config.queue_path()).unwrap_or_else(|e| {
            log::warn!("rondo: could not restore queue: {}", e);
            Queue::new()
        })
    } else {
        Queue::new()
    };
    let jukebox = Jukebox::new(Arc::clone(&engine), queue);
    jukebox.set_loop(config.loop_on_start);

    for file in &opts.files {
        match Track::from_path(file) {
            Ok(track) => jukebox.enqueue(track),
            Err(e) => eprintln!("rondo: {}", e),
        }
    }

    let reporter = Arc::new(ProgressReporter::with_interval(config.progress_interval()));
    install_hooks(&engine, &reporter);

    if !jukebox.start() {
        println!("queue is empty; add files with `add <file>`");
    }
    repl(&jukebox, &reporter);

    reporter.stop();
    if config.persist_queue {
        // Keep the interrupted track first in line for next time.
        if let Some(current) = engine.current_song() {
            jukebox.play_next(current);
        }
        if let Err(e) = jukebox.save(&config.queue_path()) {
            log::warn!("rondo: queue not saved: {}", e);
        }
    }
    engine.shutdown();
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--daemon" => {
                let addr = iter.next().ok_or("--daemon needs an address")?;
                opts.daemon = Some(addr.clone());
            }
            "--loop" => opts.looping = true,
            "--no-persist" => opts.no_persist = true,
            "--volume" => {
                let v = iter.next().ok_or("--volume needs a value")?;
                let v = v.parse().map_err(|_| format!("invalid volume: {}", v))?;
                opts.volume = Some(v);
            }
            "-h" | "--help" => opts.help = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
            file => opts.files.push(file.to_string()),
        }
    }
    Ok(opts)
}

fn apply_options(config: &mut Config, opts: &Options) {
    if let Some(addr) = &opts.daemon {
        config.backend = BackendKind::Daemon;
        config.daemon_address = addr.clone();
    }
    if opts.looping {
        config.loop_on_start = true;
    }
    if opts.no_persist {
        config.persist_queue = false;
    }
    if let Some(volume) = opts.volume {
        config.volume = volume;
    }
}

fn build_backend(config: &Config) -> PlayerResult<Arc<dyn AudioBackend>> {
    match config.backend {
        BackendKind::Local => {
            let backend = LocalBackend::new();
            backend.open_device()?;
            Ok(Arc::new(backend))
        }
        BackendKind::Daemon => {
            let mut backend = DaemonBackend::new(config.daemon_address.clone())
                .with_poll_interval(config.poll_interval());
            if let Some(dir) = &config.music_dir {
                backend = backend.with_music_dir(dir);
            }
            backend.ping()?;
            Ok(Arc::new(backend))
        }
    }
}

fn install_hooks(engine: &Arc<PlaybackEngine>, reporter: &Arc<ProgressReporter>) {
    let weak = Arc::downgrade(engine);
    let ticker = Arc::clone(reporter);
    engine.on_song_start(move |track| {
        println!("\rnow playing: {}", track);
        if let Some(engine) = weak.upgrade() {
            ticker.start(&engine, print_progress);
        }
    });
    engine.on_song_skip(|track| println!("\rskipped: {}", track));
}

// ---------------------------------------------------------------------------
// Command loop
// ---------------------------------------------------------------------------

fn repl(jukebox: &Jukebox, reporter: &ProgressReporter) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if matches!(line.trim(), "help" | "?") {
            print_commands();
            continue;
        }
        let command = match line.parse::<PlaybackCommand>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match command {
            PlaybackCommand::Quit => break,
            PlaybackCommand::List => print_queue(jukebox),
            PlaybackCommand::Now => print_now(jukebox, reporter),
            PlaybackCommand::Seek { delta_secs } => match jukebox.seek_by(delta_secs) {
                Ok(_) => {
                    reporter.seek_by(delta_secs);
                    print_progress(reporter.progress());
                }
                Err(e) => report(e),
            },
            PlaybackCommand::Volume { delta_percent } => {
                println!("volume: {}%", jukebox.volume_by(delta_percent));
            }
            PlaybackCommand::Loop => {
                let looping = jukebox.toggle_loop();
                println!("loop {}", if looping { "on" } else { "off" });
            }
            other => {
                if let Err(e) = jukebox.dispatch(&other) {
                    report(e);
                }
            }
        }
    }
}

fn report(e: PlayerError) {
    match e {
        PlayerError::State(msg) => println!("{}", msg),
        PlayerError::EmptyQueue => println!("queue is empty"),
        other => eprintln!("rondo: {}", other),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_progress(progress: Progress) {
    print!("\r  {}    ", progress.render(BAR_WIDTH));
    std::io::stdout().flush().ok();
}

fn print_now(jukebox: &Jukebox, reporter: &ProgressReporter) {
    let engine = jukebox.engine();
    let Some(track) = engine.current_song() else {
        println!("stopped");
        return;
    };
    let state = match engine.state() {
        PlaybackState::Paused => "paused",
        _ => "playing",
    };
    println!("{}: {}", state, track);
    println!(
        "  {} / {}  vol: {}%  loop: {}",
        format_time(engine.position()),
        format_time(engine.length()),
        volume_to_percent(engine.volume()),
        if jukebox.is_loop() { "on" } else { "off" },
    );
    println!("  {}", reporter.render(BAR_WIDTH));
}

fn print_queue(jukebox: &Jukebox) {
    let tracks = jukebox.queue_snapshot();
    if tracks.is_empty() {
        println!("queue is empty");
        return;
    }
    for (i, track) in tracks.iter().enumerate() {
        println!("{:>3}  {}", i, track);
    }
}

fn print_usage() {
    println!("rondo - terminal jukebox");
    println!();
    println!("usage: rondo [options] [file...]");
    println!();
    println!("options:");
    println!("  --daemon <addr>     Play through an MPD daemon at <addr>");
    println!("  --loop              Start with loop mode on");
    println!("  --no-persist        Do not restore or save the queue");
    println!("  --volume <0-100>    Starting volume");
    println!();
    print_commands();
}

fn print_commands() {
    println!("commands:");
    println!("  add <file>         Append a file to the queue");
    println!("  playnext <file>    Put a file at the front of the queue");
    println!("  play | pause       Resume / pause");
    println!("  p                  Toggle pause (or just press enter)");
    println!("  n                  Next track");
    println!("  f <±secs>          Seek");
    println!("  v <±percent>       Change volume");
    println!("  l                  Toggle loop");
    println!("  shuffle            Shuffle the queue");
    println!("  d <index>          Remove a queued track");
    println!("  clear              Empty the queue");
    println!("  ls                 Show the queue");
    println!("  now                Show the current track");
    println!("  q                  Quit");
}
