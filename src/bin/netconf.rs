//! NETCONF session CLI binary.
//!
//! # Commands
//!
//! - `capabilities` - Print the capability set this configuration advertises
//! - `hello` - Print a client or server hello document
//! - `demo` - Establish a loopback session and print both monitor views

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netconf::{
    protocol::{AuthMethod, BaseVersion, Client, Hello, Server, Session, SessionView, OK},
    transport::memory::{self, AuthPolicy},
    Config, VERSION,
};

#[derive(Parser)]
#[command(name = "netconf")]
#[command(version = VERSION)]
#[command(about = "NETCONF session establishment and capability negotiation", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/netconf/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the advertised capability set
    Capabilities {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a hello document
    Hello {
        /// Emit a server hello with this session id
        #[arg(short, long)]
        session_id: Option<u32>,
    },

    /// Run a loopback client/server session
    Demo {
        /// User to authenticate as
        #[arg(short, long)]
        user: Option<String>,

        /// Highest base version the client offers (1.0 or 1.1)
        #[arg(long, default_value = "1.1")]
        base: String,

        /// Auth methods the loopback server accepts (comma separated)
        #[arg(long, default_value = "publickey,password,keyboard-interactive")]
        accept: String,

        /// Output monitor views as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Capabilities { json } => cmd_capabilities(&config, json),
        Commands::Hello { session_id } => cmd_hello(&config, session_id),
        Commands::Demo {
            user,
            base,
            accept,
            json,
        } => cmd_demo(&config, user, &base, &accept, json),
    }
}

fn cmd_capabilities(config: &Config, json: bool) -> anyhow::Result<()> {
    let caps = config.capabilities();
    if json {
        println!("{}", serde_json::to_string_pretty(&caps.to_vec())?);
        return Ok(());
    }

    for cap in &caps {
        match cap.base_version() {
            Some(version) => println!("{cap}  (base {version})"),
            None => println!("{cap}"),
        }
    }
    eprintln!();
    eprintln!("{} capabilities", caps.len());
    Ok(())
}

fn cmd_hello(config: &Config, session_id: Option<u32>) -> anyhow::Result<()> {
    let caps = config.capabilities();
    let hello = match session_id {
        Some(0) => anyhow::bail!("session id must be positive"),
        Some(id) => Hello::server(caps, id),
        None => Hello::client(caps),
    };
    println!("{}", hello.to_xml());
    Ok(())
}

fn cmd_demo(
    config: &Config,
    user: Option<String>,
    base: &str,
    accept: &str,
    json: bool,
) -> anyhow::Result<()> {
    let user = user
        .or_else(|| config.ssh.user.clone())
        .unwrap_or_else(|| "admin".to_string());

    let highest = BaseVersion::ALL
        .into_iter()
        .find(|v| v.to_string() == base)
        .ok_or_else(|| anyhow::anyhow!("Unknown base version: {base}. Use: 1.0, 1.1"))?;
    let mut client_caps = config.capabilities();
    for newer in BaseVersion::ALL.into_iter().filter(|v| *v > highest) {
        client_caps.remove(newer.uri());
    }

    let accepted = accept
        .split(',')
        .map(|m| m.parse::<AuthMethod>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (connector, mut listener) = memory::pair(AuthPolicy::accept_only(&accepted));
        let server = Server::new()
            .with_capabilities(config.capabilities())
            .with_config(config.session_config());
        let client = Client::new(connector.clone())
            .with_auth(config.auth_preferences())
            .with_capabilities(client_caps)
            .with_config(config.session_config());

        let serve = tokio::spawn(async move {
            let mut session = server.accept(&mut listener).await?;
            while let Some(rpc) = session.recv_rpc().await? {
                session.send_reply(&rpc, "<data/>").await?;
            }
            Ok::<Session, netconf::NetconfError>(session)
        });

        let mut session = client.connect("loopback", config.ssh.port, &user).await?;
        eprintln!(
            "Session {} established with base {} (auth attempts: {:?})",
            session.id(),
            session.version(),
            connector.attempts()
        );

        let id = session.send_rpc("<get/>").await?;
        let reply = session.recv_reply().await?;
        eprintln!("rpc {} answered: {}", id, reply.xml);

        print_monitor("client", &session, json)?;
        session.close().await?;

        let server_session = serve.await??;
        print_monitor("server", &server_session, json)?;
        print_monitor("client", &session, json)?;

        if !reply.xml.contains("<data/>") && !reply.xml.contains(OK) {
            anyhow::bail!("unexpected reply: {}", reply.xml);
        }
        Ok(())
    })
}

fn print_monitor(label: &str, session: &dyn SessionView, json: bool) -> anyhow::Result<()> {
    let view = session.monitor();
    if json {
        println!("{}", view.to_json()?);
        return Ok(());
    }

    println!("[{label}] session {}", view.id);
    println!("  status:       {}", view.status);
    if let Some(reason) = view.termination_reason {
        println!("  terminated:   {reason}");
    }
    if let Some(version) = view.version {
        println!("  base:         {version}");
    }
    println!("  peer:         {}@{}:{}", view.user, view.host, view.port.unwrap_or(0));
    println!("  notification: {}", view.notification_allowed);
    println!("  rpcs in/out:  {}/{}", view.rpcs_in, view.rpcs_out);
    println!("  capabilities: {}", view.capabilities.len());
    Ok(())
}
