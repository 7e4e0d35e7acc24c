#[macro_use] extern crate log;

use clap::{Parser, Subcommand};
use fcgi_sniff::{ClientConfig, Endpoint, Params, ProxyConfig, Result};
use tokio::io::AsyncWriteExt;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

const SERVER_SOFTWARE: &str = concat!("fcgi-sniff/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "fcgi-sniff", version, about = "FastCGI client and logging pass-through proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay FastCGI traffic to an application, logging every request and response.
    Proxy {
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        listen: SocketAddr,
        /// `host:port` or `unix:/path/to/socket`
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        forward_to: Endpoint,
        /// Only log raw records.
        #[arg(long)]
        no_decode: bool,
    },
    /// Send one request to a FastCGI application and print the response.
    Request {
        /// `host:port` or `unix:/path/to/socket`
        #[arg(long, default_value = "127.0.0.1:9000")]
        host: Endpoint,
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Request path, optionally with a query string.
        #[arg(short, long, default_value = "/")]
        uri: String,
        #[arg(long, default_value = "index.php")]
        script: String,
        /// Defaults to the current directory.
        #[arg(long)]
        document_root: Option<PathBuf>,
        #[arg(short, long, default_value = "")]
        body: String,
        #[arg(long, default_value = "text/plain; charset=utf-8")]
        content_type: String,
        /// Extra environment, overriding the generated variables.
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_pair)]
        env: Vec<(String, String)>,
        #[arg(long)]
        keep_conn: bool,
    },
}

fn parse_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some(("", _)) | None => Err(format!("expected KEY=VALUE, got {:?}", s)),
        Some((k, v)) => Ok((k.to_owned(), v.to_owned())),
    }
}

struct RequestArgs {
    method: String,
    uri: String,
    script: String,
    document_root: PathBuf,
    body: String,
    content_type: String,
    env: Vec<(String, String)>,
}

fn cgi_env(args: &RequestArgs) -> Params {
    let (path, query) = args.uri.split_once('?').unwrap_or((args.uri.as_str(), ""));
    let root = args.document_root.display().to_string();
    let script = args.document_root.join(&args.script);

    let mut env = Params::new();
    let mut set = |k: &str, v: String| {
        env.insert(k.to_owned(), v);
    };
    set("GATEWAY_INTERFACE", "CGI/1.1".to_owned());
    set("SERVER_SOFTWARE", SERVER_SOFTWARE.to_owned());
    set("SERVER_PROTOCOL", "HTTP/1.1".to_owned());
    set("REQUEST_SCHEME", "http".to_owned());
    set("REQUEST_METHOD", args.method.clone());
    set("REQUEST_URI", args.uri.clone());
    set("DOCUMENT_URI", path.to_owned());
    set("SCRIPT_NAME", path.to_owned());
    set("QUERY_STRING", query.to_owned());
    set("DOCUMENT_ROOT", root);
    set("SCRIPT_FILENAME", script.display().to_string());
    set("CONTENT_LENGTH", args.body.len().to_string());
    if !args.body.is_empty() {
        set("CONTENT_TYPE", args.content_type.clone());
    }
    for (k, v) in &args.env {
        env.insert(k.clone(), v.clone());
    }
    env
}

async fn proxy(config: ProxyConfig) -> Result<()> {
    let server = config.bind().await?;
    server
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupted"),
                Err(e) => error!("cannot listen for ctrl-c: {}", e),
            }
        })
        .await
}

async fn request(config: ClientConfig, args: RequestArgs) -> Result<()> {
    let env = cgi_env(&args);
    let mut client = config.connect().await?;
    let rsp = client.request(&env, args.body.as_bytes()).await?;

    println!("status: {}", rsp.status_code);
    let mut headers: Vec<_> = rsp.headers.iter().collect();
    headers.sort();
    for (k, v) in headers {
        println!("{}: {}", k, v);
    }
    println!();
    println!("{}", rsp.stdout);
    if !rsp.stderr.is_empty() {
        eprintln!("stderr: {}", rsp.stderr);
    }

    // With keep-conn the application leaves closing to us.
    if let Err(e) = client.into_inner().shutdown().await {
        debug!("closing connection: {}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Proxy {
            listen,
            forward_to,
            no_decode,
        } => {
            proxy(ProxyConfig {
                listen,
                forward_to,
                decode: !no_decode,
            })
            .await
        }
        Command::Request {
            host,
            method,
            uri,
            script,
            document_root,
            body,
            content_type,
            env,
            keep_conn,
        } => {
            let document_root = match document_root {
                Some(root) => root,
                None => match std::env::current_dir() {
                    Ok(cwd) => cwd,
                    Err(e) => {
                        error!("cannot determine document root: {}", e);
                        process::exit(2);
                    }
                },
            };
            let config = ClientConfig {
                endpoint: host,
                keep_conn,
                ..ClientConfig::default()
            };
            let args = RequestArgs {
                method,
                uri,
                script,
                document_root,
                body,
                content_type,
                env,
            };
            request(config, args).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}
