use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value as JsonValue;

fn usage() -> ! {
    eprintln!(
        r#"tether

Usage:
  tether status        [--sock /path/to/tetherd.sock]
  tether projects      [--sock ...]
  tether register      --cwd /path/to/project [--name NAME] [--sock ...]
  tether unregister    --id PROJECT_ID [--sock ...]
  tether snapshot-diff --id PROJECT_ID --hash TREE_HASH [--sock ...]

Notes:
  - If --sock is omitted, TETHER_LOCAL_SOCKET is tried, then
    ~/.tether/tetherd.sock.
"#
    );
    std::process::exit(2);
}

fn get_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn request_unix(
    sock_path: &str,
    method: &str,
    path: &str,
    body: Option<Vec<u8>>,
) -> anyhow::Result<(StatusCode, String)> {
    let stream = tokio::net::UnixStream::connect(sock_path)
        .await
        .with_context(|| format!("connect unix socket: {sock_path}"))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("http1 handshake")?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(format!("http://localhost{path}"));
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = builder
        .body(Full::new(Bytes::from(body.unwrap_or_default())))
        .context("build request")?;

    let resp = sender.send_request(req).await.context("send request")?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .context("read response body")?
        .to_bytes();
    Ok((status, String::from_utf8_lossy(&bytes).to_string()))
}

fn tether_home() -> Option<std::path::PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(std::path::PathBuf::from(home).join(".tether"))
}

fn pick_sock(sock_arg: Option<String>) -> anyhow::Result<String> {
    if let Some(s) = sock_arg.filter(|s| !s.trim().is_empty()) {
        return Ok(s);
    }
    if let Ok(s) = std::env::var("TETHER_LOCAL_SOCKET") {
        if !s.trim().is_empty() {
            return Ok(s);
        }
    }
    if let Some(root) = tether_home() {
        let candidate = root.join("tetherd.sock");
        if candidate.exists() {
            return Ok(candidate.to_string_lossy().to_string());
        }
    }
    anyhow::bail!("no daemon socket found; is tetherd running?")
}

fn print_body(body: &str) {
    match serde_json::from_str::<JsonValue>(body) {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_default()),
        Err(_) => println!("{body}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        usage();
    };
    let sock = pick_sock(get_arg(&args, "--sock"))?;

    let (status, body) = match command {
        "status" => request_unix(&sock, "GET", "/status", None).await?,
        "projects" => request_unix(&sock, "GET", "/projects", None).await?,
        "register" => {
            let Some(cwd) = get_arg(&args, "--cwd") else {
                usage();
            };
            let mut req = serde_json::Map::new();
            req.insert("cwd".into(), JsonValue::String(cwd));
            if let Some(name) = get_arg(&args, "--name") {
                req.insert("name".into(), JsonValue::String(name));
            }
            let body = serde_json::to_vec(&JsonValue::Object(req))?;
            request_unix(&sock, "POST", "/projects", Some(body)).await?
        }
        "unregister" => {
            let Some(id) = get_arg(&args, "--id") else {
                usage();
            };
            request_unix(&sock, "DELETE", &format!("/projects/{id}"), None).await?
        }
        "snapshot-diff" => {
            let (Some(id), Some(hash)) = (get_arg(&args, "--id"), get_arg(&args, "--hash")) else {
                usage();
            };
            request_unix(
                &sock,
                "GET",
                &format!("/snapshot/diff?project_id={id}&hash={hash}"),
                None,
            )
            .await?
        }
        _ => usage(),
    };

    if !status.is_success() {
        eprintln!("error ({status}): {body}");
        std::process::exit(1);
    }
    print_body(&body);
    Ok(())
}
