//! Viewer link command-line client.
//!
//! Connects to a viewer backend, sends one command and prints the reply as
//! JSON, or listens for frames the server pushes.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use link_schema::{FileArgT, FileType, ServerReplyT};
use link_session::{Client, DispatchError, ReplyFrame, Unsolicited};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::LinkConfig;
use logging::LinkLogFormatter;

/// Command-line client for the viewer backend
#[derive(Parser, Debug)]
#[command(name = "viewer-link", version, about = "Talk to a viewer backend over the link protocol")]
struct Args {
    /// Configuration file path (YAML, `link:` section)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server address, e.g. 127.0.0.1:7000
    #[arg(long, global = true)]
    server: Option<String>,

    /// Session id stamped on commands
    #[arg(long, global = true)]
    instance_id: Option<String>,

    /// Reply timeout, e.g. 30s
    #[arg(long, global = true)]
    timeout: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the procedures the server offers
    ListProcedures,
    /// Upload a model file
    LoadFile {
        /// File to upload
        path: PathBuf,
        /// File type; inferred from the extension when omitted
        #[arg(long)]
        file_type: Option<FileType>,
        /// Argument name; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Clear the scene
    ClearScene,
    /// Print frames pushed by the server
    Listen {
        /// How long to listen
        #[arg(long, default_value = "30s")]
        duration: humantime::Duration,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("viewer_link={}", args.log_level).parse()?)
        .add_directive(format!("link_session={}", args.log_level).parse()?)
        .add_directive(format!("link_schema={}", args.log_level).parse()?)
        .add_directive(format!("link_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(LinkLogFormatter::new("link"))
        .init();

    let mut link_config = LinkConfig::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        link_config.server = server;
    }
    if let Some(instance_id) = args.instance_id {
        link_config.instance_id = Some(instance_id);
    }
    if let Some(timeout) = args.timeout {
        link_config.timeout = timeout.into();
    }

    let (client, unsolicited) = Client::connect(link_config.client_config())
        .await
        .with_context(|| format!("Failed to connect to {}", link_config.server))?;
    component_info!("cli", "Connected as instance {}", client.instance_id());

    let result = match args.command {
        Command::ListProcedures => client.list_procedures().await.map(Some),
        Command::ClearScene => client.clear_scene().await.map(Some),
        Command::LoadFile {
            path,
            file_type,
            name,
        } => {
            let (file, data) = read_model(&path, file_type, name).await?;
            component_info!(
                "cli",
                "Uploading {} ({}, {} bytes)",
                path.display(),
                file.file_type,
                data.len()
            );
            client.load_file(file, data).await.map(Some)
        }
        Command::Listen { duration } => {
            listen(unsolicited, duration.into()).await?;
            Ok(None)
        }
    };

    client.close();
    match result {
        Ok(Some(reply)) => print_reply(&reply),
        Ok(None) => Ok(()),
        Err(DispatchError::Server { code, message }) => {
            component_error!("cli", "Server rejected the command");
            bail!("server error {}: {}", code, message)
        }
        Err(e) => Err(e).context("Request failed"),
    }
}

/// Read a model file and describe it
async fn read_model(
    path: &Path,
    file_type: Option<FileType>,
    name: Option<String>,
) -> Result<(FileArgT, Bytes)> {
    let file_type = match file_type {
        Some(file_type) => file_type,
        None => infer_file_type(path)
            .with_context(|| format!("Cannot infer file type of {}, use --file-type", path.display()))?,
    };
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?,
    };

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((FileArgT::new(name, file_type), Bytes::from(data)))
}

fn infer_file_type(path: &Path) -> Option<FileType> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "ifc" => Some(FileType::Ifc),
        "stl" => Some(FileType::Stl),
        "obj" => Some(FileType::Obj),
        "gltf" | "glb" => Some(FileType::Gltf),
        "step" | "stp" => Some(FileType::Step),
        _ => None,
    }
}

fn print_reply(reply: &ReplyFrame) -> Result<()> {
    let reply: ServerReplyT = reply.unpack().context("Reply could not be decoded")?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

/// Print unsolicited frames until `duration` elapses or the connection ends
async fn listen(mut unsolicited: mpsc::UnboundedReceiver<Unsolicited>, duration: Duration) -> Result<()> {
    component_info!("cli", "Listening for {}", humantime::format_duration(duration));
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            frame = unsolicited.recv() => {
                let Some(frame) = frame else {
                    component_warn!("cli", "Connection closed while listening");
                    break;
                };
                match frame {
                    Unsolicited::Command(message) => {
                        println!("{}", serde_json::to_string(&message)?);
                    }
                    Unsolicited::Reply(reply) => {
                        println!("{}", serde_json::to_string(&reply.unpack()?)?);
                    }
                    Unsolicited::Malformed { error, frame } => {
                        component_warn!("cli", "Dropped malformed frame of {} bytes: {}", frame.len(), error);
                    }
                }
            }
        }
    }

    component_debug!("cli", "Listen finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_file_type() {
        assert_eq!(infer_file_type(Path::new("tower.IFC")), Some(FileType::Ifc));
        assert_eq!(infer_file_type(Path::new("part.stp")), Some(FileType::Step));
        assert_eq!(infer_file_type(Path::new("scene.glb")), Some(FileType::Gltf));
        assert_eq!(infer_file_type(Path::new("notes.txt")), None);
        assert_eq!(infer_file_type(Path::new("Makefile")), None);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "viewer-link",
            "--server",
            "10.1.1.1:7000",
            "load-file",
            "model.bin",
            "--file-type",
            "stl",
            "--timeout",
            "5s",
        ])
        .unwrap();

        assert_eq!(args.server.as_deref(), Some("10.1.1.1:7000"));
        assert_eq!(
            args.timeout.map(Duration::from),
            Some(Duration::from_secs(5))
        );
        match args.command {
            Command::LoadFile {
                path, file_type, ..
            } => {
                assert_eq!(path, PathBuf::from("model.bin"));
                assert_eq!(file_type, Some(FileType::Stl));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_model_defaults_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bracket.obj");
        std::fs::write(&path, b"v 0 0 0\n").unwrap();

        let (file, data) = read_model(&path, None, None).await.unwrap();
        assert_eq!(file.name.as_deref(), Some("bracket.obj"));
        assert_eq!(file.file_type, FileType::Obj);
        assert_eq!(&data[..], b"v 0 0 0\n");
    }
}
