//! nowproto - NOW-proto command-line client
//!
//! One-shot client commands against a NOW-proto peer, plus an RDM host mode.

use clap::{Parser, Subcommand};
use colored::Colorize;
use now_client::{
    ClientError, Config, ExecEvent, ExecRequest, HostEvent, HostHandle, NowClient, RdmHost,
};
use now_proto::rdm::{
    AppReason, AppState, RdmAppNotify, RdmSessionNotify, SessionAction, SessionNotifyKind,
};
use now_proto::session::{MsgBoxRequest, MsgBoxStyle};
use now_proto::{ExecProcess, ExecRun, ExecShell, Shutdown};
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nowproto")]
#[command(about = "Command-line client for the NOW-proto remote execution protocol")]
#[command(version)]
struct Cli {
    /// Peer address (overrides the configured one)
    #[arg(short, long, env = "NOW_ADDR")]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the negotiated capabilities as JSON
    Caps,

    /// Lock the remote session
    Lock,

    /// Log off the remote session
    Logoff,

    /// Show a message box in the remote session
    Msgbox {
        /// Message text
        message: String,

        /// Window title
        #[arg(long)]
        title: Option<String>,

        /// Win32 MB_* style value
        #[arg(long, default_value = "0")]
        style: u32,

        /// Auto-dismiss after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Wait for and print the pressed button
        #[arg(long)]
        wait: bool,
    },

    /// Start a command without output redirection
    Run {
        /// Command line
        command: String,

        /// Working directory
        #[arg(short, long)]
        directory: Option<String>,
    },

    /// Run a command through a shell and stream its output
    Shell {
        /// Command line
        command: String,

        /// Shell to use instead of the system default
        #[arg(long)]
        shell: Option<String>,

        /// Working directory
        #[arg(short, long)]
        directory: Option<String>,
    },

    /// Start an executable and stream its output
    Process {
        /// Executable path
        filename: String,

        /// Command-line parameters
        #[arg(short, long)]
        parameters: Option<String>,
    },

    /// Shut down the remote system
    Shutdown {
        /// Reboot instead of powering off
        #[arg(long)]
        reboot: bool,

        /// Close applications without saving
        #[arg(long)]
        force: bool,

        /// Delay in seconds
        #[arg(long, default_value = "0")]
        timeout: u64,

        /// Message shown to logged-on users
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Print the companion application capabilities as JSON
    RdmCaps,

    /// Serve the RDM side of the protocol on a TCP listener
    RdmHost {
        /// Bind address (overrides the configured one)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(addr) = cli.addr {
        config.connection.addr = addr;
    }

    if let Commands::RdmHost { bind } = cli.command {
        if let Some(bind) = bind {
            config.host.bind_addr = bind;
        }
        return run_host(&config).await;
    }

    let client_config = config.client_config()?;
    let stream = tokio::time::timeout(
        client_config.connect_timeout,
        TcpStream::connect(config.connection.addr.as_str()),
    )
    .await
    .map_err(|_| ClientError::Timeout)??;
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {}", config.connection.addr);

    let client = match NowClient::connect(stream, client_config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}: {}", "Connection failed".red(), e);
            std::process::exit(1);
        }
    };

    match run_command(&client, cli.command).await {
        Ok(Some(code)) => {
            let _ = client.close().await;
            std::process::exit(i32::try_from(code).unwrap_or(i32::MAX));
        }
        Ok(None) => {
            client.close().await?;
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Runs one client command. Returns the remote exit code for commands that
/// stream a process.
async fn run_command(
    client: &NowClient,
    command: Commands,
) -> Result<Option<u32>, Box<dyn std::error::Error>> {
    match command {
        Commands::Caps => {
            println!("{}", serde_json::to_string_pretty(client.capabilities())?);
        }
        Commands::Lock => {
            client.session_lock().await?;
            eprintln!("{}", "Session locked".green());
        }
        Commands::Logoff => {
            client.session_logoff().await?;
            eprintln!("{}", "Logoff requested".green());
        }
        Commands::Msgbox {
            message,
            title,
            style,
            timeout,
            wait,
        } => {
            let mut request = MsgBoxRequest::new(0, message).with_style(MsgBoxStyle(style));
            if let Some(title) = title {
                request = request.with_title(title);
            }
            if let Some(secs) = timeout {
                request = request.with_timeout(Duration::from_secs(secs));
            }

            if wait {
                let pending = client.session_msgbox_with_response(request).await?;
                let response = pending.response().await?;
                println!("{:?}", response);
            } else {
                client.session_msgbox(request).await?;
            }
        }
        Commands::Run { command, directory } => {
            let mut request = ExecRun::new(0, command);
            if let Some(directory) = directory {
                request = request.with_directory(directory);
            }
            let session_id = client.exec_run(request).await?;
            eprintln!("{} (session {})", "Started".green(), session_id);
        }
        Commands::Shell {
            command,
            shell,
            directory,
        } => {
            let mut request = ExecShell::new(0, command).with_io_redirection();
            if let Some(shell) = shell {
                request = request.with_shell(shell);
            }
            if let Some(directory) = directory {
                request = request.with_directory(directory);
            }
            return stream_exec(client, ExecRequest::Shell(request))
                .await
                .map(Some);
        }
        Commands::Process {
            filename,
            parameters,
        } => {
            let mut request = ExecProcess::new(0, filename).with_io_redirection();
            if let Some(parameters) = parameters {
                request = request.with_parameters(parameters);
            }
            return stream_exec(client, ExecRequest::Process(request))
                .await
                .map(Some);
        }
        Commands::Shutdown {
            reboot,
            force,
            timeout,
            message,
        } => {
            let shutdown = Shutdown::new(Duration::from_secs(timeout), message)
                .with_force(force)
                .with_reboot(reboot);
            client.system_shutdown(shutdown).await?;
            eprintln!("{}", "Shutdown requested".green());
        }
        Commands::RdmCaps => {
            let caps = client.rdm_capabilities().await?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
        Commands::RdmHost { .. } => unreachable!(), // handled before connecting
    }
    Ok(None)
}

/// Streams stdout and stderr of an execution session until it completes.
async fn stream_exec(
    client: &NowClient,
    request: ExecRequest,
) -> Result<u32, Box<dyn std::error::Error>> {
    let mut session = client.exec(request).await?;

    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(ExecEvent::Started) => {
                    tracing::debug!("Session {} started", session.session_id());
                }
                Some(ExecEvent::Stdout { data, .. }) => {
                    let mut out = std::io::stdout().lock();
                    out.write_all(&data)?;
                    out.flush()?;
                }
                Some(ExecEvent::Stderr { data, .. }) => {
                    let mut err = std::io::stderr().lock();
                    err.write_all(&data)?;
                    err.flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Canceling...".dimmed());
                session.cancel().await?;
            }
        }
    }

    Ok(session.result().await?)
}

async fn run_host(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(config.host.bind_addr).await?;
    tracing::info!("RDM host listening on {}", config.host.bind_addr);
    tracing::info!("  RDM version: {}", config.host.rdm_version);
    tracing::info!("  App available: {}", config.host.app_available);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true)?;
                let host = RdmHost::from_config(&config.host);
                tokio::spawn(async move {
                    if let Err(e) = serve_host(host, stream, peer).await {
                        tracing::warn!("RDM client {} ended: {}", peer, e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping host...");
                return Ok(());
            }
        }
    }
}

async fn serve_host(
    host: RdmHost,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ClientError> {
    let (handle, mut events) = host.accept(stream).await?;
    tracing::info!("Serving RDM client {}", peer);

    while let Some(event) = events.recv().await {
        handle_host_event(&handle, event).await?;
    }

    handle.wait().await
}

/// Acknowledges client requests the way a headless companion would.
async fn handle_host_event(handle: &HostHandle, event: HostEvent) -> Result<(), ClientError> {
    match event {
        HostEvent::AppStart(start) => {
            tracing::info!("App start requested (flags {:?})", start.launch_flags);
            handle
                .app_notify(RdmAppNotify {
                    state: AppState::Ready,
                    reason: AppReason::UserInitiated,
                    data: String::new(),
                })
                .await
        }
        HostEvent::AppAction { action, data } => {
            tracing::info!("App action {:?} {}", action, data);
            Ok(())
        }
        HostEvent::SessionStart(start) => {
            tracing::info!(
                "Session {} started for connection {}",
                start.session_id,
                start.connection_id
            );
            Ok(())
        }
        HostEvent::SessionAction { action, session_id } => {
            tracing::info!("Session {} action {:?}", session_id, action);
            let kind = match action {
                SessionAction::Close => SessionNotifyKind::Close,
                SessionAction::Focus => SessionNotifyKind::Focus,
                SessionAction::Other(value) => SessionNotifyKind::Other(value),
            };
            handle
                .session_notify(RdmSessionNotify {
                    kind,
                    session_id,
                    log_data: String::new(),
                })
                .await
        }
    }
}
