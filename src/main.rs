//! In-process SRD demo
//!
//! Runs a client and a server against each other, dumps every message and
//! finishes by exchanging a `text/plain` blob under the negotiated keys.

use anyhow::{bail, Context as _};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use srd::{auth_header, Blob, CipherId, CipherRegistry, Context, ContextConfig, Role, Status};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CipherArg {
    Aes256Gcm,
    Chacha20,
    Xchacha20,
}

impl From<CipherArg> for CipherId {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Aes256Gcm => CipherId::Aes256Gcm,
            CipherArg::Chacha20 => CipherId::ChaCha20Poly1305,
            CipherArg::Xchacha20 => CipherId::XChaCha20Poly1305,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "srd-demo", version, about = "SRD handshake demo")]
struct Args {
    /// Username delegated by the client
    #[arg(short, long, default_value = "username", env = "SRD_USERNAME")]
    username: String,

    /// Password delegated by the client
    #[arg(short, long, default_value = "password", env = "SRD_PASSWORD")]
    password: String,

    /// Ciphers the client offers (comma-separated); the server accepts all
    #[arg(long, value_enum, value_delimiter = ',', env = "SRD_CIPHERS")]
    ciphers: Vec<CipherArg>,

    /// Complete after key confirmation without delegating credentials
    #[arg(long, env = "SRD_SKIP_DELEGATION")]
    skip_delegation: bool,

    /// Certificate bytes bound into the handshake on both sides
    #[arg(long, env = "SRD_CERT")]
    cert: Option<String>,

    /// Text sent from client to server after the handshake
    #[arg(long, default_value = "Client message!!!!!")]
    message: String,

    /// Print messages as HTTP authorization header values
    #[arg(long)]
    headers: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "srd=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut client_config = ContextConfig::default().with_skip_delegation(args.skip_delegation);
    if !args.ciphers.is_empty() {
        let ciphers: Vec<CipherId> = args.ciphers.iter().copied().map(CipherId::from).collect();
        client_config = client_config.with_ciphers(&ciphers);
    }
    let server_config = ContextConfig::default().with_skip_delegation(args.skip_delegation);

    let registry = CipherRegistry::default();
    let mut client = Context::with_config(Role::Client, registry.clone(), client_config)
        .context("client configuration")?;
    let mut server = Context::with_config(Role::Server, registry, server_config)
        .context("server configuration")?;

    if !args.skip_delegation {
        client.set_blob("Basic", format!("{}:{}", args.username, args.password));
    }
    if let Some(cert) = &args.cert {
        client.set_cert_data(cert.as_bytes());
        server.set_cert_data(cert.as_bytes());
    }

    println!("Using: X25519 + HKDF-SHA256 + HMAC-SHA256, SRD version 0x{:04x}\n", srd::SRD_VERSION);

    let mut client_status = Status::Continue;
    let mut server_status = Status::Continue;
    let mut to_client: Vec<u8> = Vec::new();
    let mut round = 0;

    while client_status.is_continue() || server_status.is_continue() {
        round += 1;

        let to_server = if client_status.is_continue() {
            client_status = client.input(&to_client);
            client.output().map(<[u8]>::to_vec).unwrap_or_default()
        } else {
            Vec::new()
        };
        show(round, "client -> server", &to_server, args.headers);

        to_client = if server_status.is_continue() {
            server_status = server.input(&to_server);
            server.output().map(<[u8]>::to_vec).unwrap_or_default()
        } else {
            Vec::new()
        };
        show(round, "server -> client", &to_client, args.headers);
    }

    if let Status::Failed(err) = &client_status {
        bail!("client failed: {err}");
    }
    if let Status::Failed(err) = &server_status {
        bail!("server failed: {err}");
    }

    let cipher = server.cipher().context("no negotiated cipher")?;
    println!("Handshake completed in {round} rounds\n");
    println!("Cipher:          {cipher}");
    println!(
        "Delegation key:  {}",
        hex::encode(client.delegation_key().unwrap_or_default())
    );
    println!(
        "Integrity key:   {}",
        hex::encode(client.integrity_key().unwrap_or_default())
    );
    println!(
        "Keys match:      {}\n",
        client.session_keys() == server.session_keys()
    );

    match server.blob() {
        Some(blob) => println!(
            "Server received blob {:?}: {:?}\n",
            blob.name(),
            String::from_utf8_lossy(blob.data())
        ),
        None => println!("No blob delegated\n"),
    }

    let message = Blob::new("text/plain", args.message.as_bytes());
    let sealed = client.encrypt_blob(&message)?;
    let opened = server.decrypt_blob(&sealed)?;
    println!("Client -> Server {:?} blob", opened.name());
    println!("Ciphertext: {} bytes", sealed.len());
    println!("Decrypted:  {:?}", String::from_utf8_lossy(opened.data()));

    Ok(())
}

fn show(round: usize, direction: &str, message: &[u8], headers: bool) {
    if message.is_empty() {
        return;
    }

    println!("[{round}] {direction} ({} bytes)", message.len());
    if headers {
        println!("    {}", auth_header::encode(message));
    } else {
        for line in message.chunks(32) {
            println!("    {}", hex::encode(line));
        }
    }
    println!();
}
