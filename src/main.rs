use clap::{Arg, Command};
use log::LevelFilter;
use std::process;
use std::sync::Arc;
use token_harvester::admin;
use token_harvester::config::Config;
use token_harvester::dispatch::build_dispatcher;
use token_harvester::identity::IdentityGenerator;
use token_harvester::message::InboundMessage;
use token_harvester::milter::Milter;
use token_harvester::pipeline::{Disposition, TokenPipeline};
use token_harvester::store::{open_store, IdentityStore};

#[tokio::main]
async fn main() {
    let matches = Command::new("token-harvester")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Collects 511 SF Bay Open API tokens for disposable email identities")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/token-harvester.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stat")
                .long("stat")
                .help("Print every stored identity and its token as JSON")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gen")
                .long("gen")
                .help("Reserve one new identity and print its address")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-emails")
                .long("generate-emails")
                .value_name("COUNT")
                .help("Bulk-reserve COUNT identities")
                .value_parser(clap::value_parser!(usize))
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("process-email")
                .long("process-email")
                .value_name("FILE")
                .help("Run a raw email file through the token pipeline")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("from")
                .long("from")
                .value_name("ADDRESS")
                .help("Envelope sender for --process-email (default: Return-Path/From)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("to")
                .long("to")
                .value_name("ADDRESS")
                .help("Envelope recipient for --process-email (default: Delivered-To/To)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging, including decoded message bodies")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Run as a daemon (background process)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Initialize logger based on verbose flag
    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/token-harvester.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        match config.validate() {
            Ok(()) => {
                println!("Identity domain: {}", config.identity.domain);
                println!("Verification base: {}", config.service.verify_base_url);
                println!("Forward unrelated mail to: {}", config.forward_to);
                match IdentityGenerator::new(&config.identity) {
                    Ok(generator) => println!(
                        "Identity vocabulary: {} combinations",
                        generator.vocabulary_size()
                    ),
                    Err(e) => {
                        println!("❌ Configuration validation failed: {e}");
                        process::exit(1);
                    }
                }
                println!("✅ Configuration is valid");
            }
            Err(e) => {
                println!("❌ Configuration validation failed:");
                println!("Error: {e:#}");
                process::exit(1);
            }
        }
        return;
    }

    let store = match open_store(&config.store) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Failed to open identity store: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("stat") {
        show_stat(store.as_ref()).await;
        return;
    }

    if matches.get_flag("gen") || matches.contains_id("generate-emails") {
        let generator = match IdentityGenerator::new(&config.identity) {
            Ok(generator) => generator,
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        };

        if let Some(count) = matches.get_one::<usize>("generate-emails") {
            match admin::generate_many(&generator, store.as_ref(), *count).await {
                Ok(addresses) => {
                    log::info!("Reserved {} identities", addresses.len());
                    println!("OK");
                }
                Err(e) => {
                    eprintln!("❌ Failed to reserve identities: {e}");
                    process::exit(1);
                }
            }
        } else {
            match admin::generate_one(&generator, store.as_ref()).await {
                Ok(address) => println!("{address}"),
                Err(e) => {
                    eprintln!("❌ Failed to reserve identity: {e}");
                    process::exit(1);
                }
            }
        }
        return;
    }

    let pipeline = Arc::new(TokenPipeline::new(
        &config,
        store,
        build_dispatcher(&config.dispatch),
    ));

    if let Some(email_file) = matches.get_one::<String>("process-email") {
        process_email_file(
            &pipeline,
            email_file,
            matches.get_one::<String>("from").map(String::as_str),
            matches.get_one::<String>("to").map(String::as_str),
        )
        .await;
        return;
    }

    if matches.get_flag("daemon") {
        daemonize(&config.pid_file);
    }

    log::info!("Starting token-harvester milter...");

    let milter = Milter::new(pipeline, &config.identity.domain);
    if let Err(e) = milter.run(&config.socket_path).await {
        log::error!("Milter error: {e}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

async fn show_stat(store: &dyn IdentityStore) {
    match admin::stat(store).await {
        Ok(Some(listing)) => match serde_json::to_string_pretty(&listing) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Failed to encode listing: {e}");
                process::exit(1);
            }
        },
        Ok(None) => {
            eprintln!("No tokens found");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("❌ Failed to read identity store: {e}");
            process::exit(1);
        }
    }
}

async fn process_email_file(
    pipeline: &TokenPipeline,
    email_file: &str,
    from: Option<&str>,
    to: Option<&str>,
) {
    println!("🧪 Processing email file: {}", email_file);

    let raw = match std::fs::read_to_string(email_file) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("❌ Error reading email file: {}", e);
            process::exit(1);
        }
    };

    let message = InboundMessage::parse(&raw, from, to);
    println!("📧 Email Details:");
    println!("   Sender: {}", message.from);
    println!("   Recipient: {}", message.to);
    if let Some(subject) = message.subject() {
        println!("   Subject: {}", subject);
    }
    println!();

    match pipeline.handle(&message).await {
        Ok(Disposition::Forward { to }) => {
            println!("📨 Result: FORWARD to {}", to);
        }
        Ok(Disposition::LinkDispatched { url }) => {
            println!("🔗 Result: verification link dispatched");
            println!("   {}", url);
        }
        Ok(Disposition::TokenStored { address, token }) => {
            println!("✅ Result: token stored for {}", address);
            println!("   {}", token);
        }
        Ok(Disposition::TokenKept { address }) => {
            println!("⏸️  Result: {} already has a token, kept it", address);
        }
        Ok(Disposition::NoMatch { classification }) => {
            println!("⚠️  Result: {:?} message without the expected content", classification);
        }
        Err(e) => {
            eprintln!("❌ Processing failed: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(unix)]
fn daemonize(pid_file: &str) {
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    log::info!("Starting token-harvester in daemon mode...");

    // First fork
    match unsafe { libc::fork() } {
        -1 => {
            log::error!("Failed to fork process");
            process::exit(1);
        }
        0 => {}
        _ => process::exit(0),
    }

    // Create new session (become session leader)
    if unsafe { libc::setsid() } == -1 {
        log::error!("Failed to create new session");
        process::exit(1);
    }

    unsafe {
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }

    // Second fork so we can never reacquire a controlling terminal
    match unsafe { libc::fork() } {
        -1 => {
            log::error!("Failed to second fork");
            process::exit(1);
        }
        0 => {}
        _ => process::exit(0),
    }

    if let Ok(root) = std::ffi::CString::new("/") {
        if unsafe { libc::chdir(root.as_ptr()) } == -1 {
            log::warn!("Failed to change working directory to /");
        }
    }

    unsafe {
        libc::umask(0o022);
    }

    if let Ok(dev_null) = OpenOptions::new().read(true).write(true).open("/dev/null") {
        let null_fd = dev_null.as_raw_fd();
        unsafe {
            libc::dup2(null_fd, 0);
            libc::dup2(null_fd, 1);
            libc::dup2(null_fd, 2);
        }
        std::mem::forget(dev_null);
    } else {
        log::warn!("Failed to open /dev/null, closing standard file descriptors");
        unsafe {
            libc::close(0);
            libc::close(1);
            libc::close(2);
        }
    }

    let pid = unsafe { libc::getpid() };
    if let Err(e) = std::fs::write(pid_file, pid.to_string()) {
        log::warn!("Failed to write PID file: {e}");
    } else {
        log::info!("PID file written: {pid_file} ({pid})");
    }

    let pid_file_path = pid_file.to_string();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, cleaning up...");
        if std::path::Path::new(&pid_file_path).exists() {
            if let Err(e) = std::fs::remove_file(&pid_file_path) {
                log::warn!("Failed to remove PID file: {e}");
            } else {
                log::info!("PID file removed");
            }
        }
        process::exit(0);
    }) {
        log::warn!("Failed to install signal handler: {e}");
    }

    log::info!("Daemon mode initialization complete");
}

#[cfg(not(unix))]
fn daemonize(_pid_file: &str) {
    log::warn!("Daemon mode not supported on this platform, running in foreground");
}
