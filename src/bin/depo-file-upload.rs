//! Command-line client for the deposition file service: chunked uploads with
//! optional resume, whole-file downloads and deposit listings.

use clap::Parser;
use colored::Colorize;
use depo_file_repo::fileops;
use depo_file_repo::models::HashKind;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "depo-file-upload")]
#[command(about = "Upload and download deposition files", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Upload: FILE REPO_TYPE DEP_ID CONTENT_TYPE MILESTONE PART FORMAT VERSION
    #[arg(short = 'u', long = "upload", num_args = 8, action = clap::ArgAction::Append,
          value_names = ["FILE", "REPO", "DEP", "CT", "MS", "PART", "FMT", "VER"])]
    upload: Vec<String>,

    /// Download: FOLDER REPO_TYPE DEP_ID CONTENT_TYPE MILESTONE PART FORMAT VERSION
    #[arg(short = 'd', long = "download", num_args = 8, action = clap::ArgAction::Append,
          value_names = ["FOLDER", "REPO", "DEP", "CT", "MS", "PART", "FMT", "VER"])]
    download: Vec<String>,

    /// List a deposit directory: REPO_TYPE DEP_ID
    #[arg(short = 'l', long = "list", num_args = 2, value_names = ["REPO", "DEP"])]
    list: Vec<String>,

    /// Resume interrupted uploads
    #[arg(short = 'r', long)]
    resumable: bool,

    /// Allow overwriting an existing target version
    #[arg(short = 'o', long)]
    overwrite: bool,

    /// Compress each file before upload
    #[arg(short = 'z', long)]
    compress: bool,

    /// Ask the server to decompress after upload completes
    #[arg(short = 'x', long)]
    decompress: bool,

    /// Service base URL
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    url: String,

    /// Bearer token; fetched from the token endpoint when omitted
    #[arg(long)]
    token: Option<String>,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,
}

/// One logical file argument block
struct FileTuple {
    local: PathBuf,
    repository_type: String,
    dep_id: String,
    content_type: String,
    milestone: String,
    part_number: String,
    content_format: String,
    version: String,
}

impl FileTuple {
    fn parse(block: &[String]) -> Self {
        FileTuple {
            local: PathBuf::from(&block[0]),
            repository_type: block[1].clone(),
            dep_id: block[2].clone(),
            content_type: block[3].clone(),
            milestone: block[4].clone(),
            part_number: block[5].clone(),
            content_format: block[6].clone(),
            version: block[7].clone(),
        }
    }

    fn milestone_param(&self) -> &str {
        match self.milestone.as_str() {
            "none" | "-" => "",
            other => other,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = reqwest::Client::new();

    let token = match &args.token {
        Some(token) => token.clone(),
        None => match fetch_token(&client, &args.url).await {
            Ok(token) => token,
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                process::exit(1);
            }
        },
    };

    let mut failures = 0;

    for block in args.upload.chunks(8) {
        let tuple = FileTuple::parse(block);
        if let Err(e) = upload_one(&client, &args, &token, &tuple).await {
            eprintln!("{} {}", "upload failed:".red().bold(), e);
            failures += 1;
        }
    }

    for block in args.download.chunks(8) {
        let tuple = FileTuple::parse(block);
        if let Err(e) = download_one(&client, &args, &tuple).await {
            eprintln!("{} {}", "download failed:".red().bold(), e);
            failures += 1;
        }
    }

    if args.list.len() == 2 {
        if let Err(e) = list_dir(&client, &args, &token).await {
            eprintln!("{} {}", "list failed:".red().bold(), e);
            failures += 1;
        }
    }

    if failures > 0 {
        process::exit(1);
    }
}

async fn fetch_token(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client
        .get(format!("{}/token", url))
        .send()
        .await
        .map_err(|e| format!("could not reach token endpoint: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("token endpoint returned {}", response.status()));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("bad token response: {}", e))?;
    body["token"]
        .as_str()
        .map(|t| t.to_string())
        .ok_or_else(|| "token missing from response".to_string())
}

async fn upload_one(
    client: &reqwest::Client,
    args: &Args,
    token: &str,
    tuple: &FileTuple,
) -> Result<(), String> {
    if !tuple.local.exists() {
        return Err(format!("file does not exist: {}", tuple.local.display()));
    }

    // optionally compress into a scratch file beside the source
    let (source, file_extension) = if args.compress {
        let data = std::fs::read(&tuple.local).map_err(|e| e.to_string())?;
        let compressed = fileops::gzip_bytes(&data).map_err(|e| e.to_string())?;
        let scratch = PathBuf::from(format!("{}.gz", tuple.local.display()));
        std::fs::write(&scratch, compressed).map_err(|e| e.to_string())?;
        (scratch, Some("gz".to_string()))
    } else {
        (tuple.local.clone(), None)
    };

    let file_size = std::fs::metadata(&source).map_err(|e| e.to_string())?.len();
    let digest = depo_file_repo::digest::hash_file(&source, HashKind::MD5)
        .map_err(|e| e.to_string())?;

    // negotiate the session
    let response = client
        .get(format!("{}/getUploadParameters", args.url))
        .bearer_auth(token)
        .query(&[
            ("repositoryType", tuple.repository_type.as_str()),
            ("depId", tuple.dep_id.as_str()),
            ("contentType", tuple.content_type.as_str()),
            ("milestone", tuple.milestone_param()),
            ("partNumber", tuple.part_number.as_str()),
            ("contentFormat", tuple.content_format.as_str()),
            ("version", tuple.version.as_str()),
            ("allowOverwrite", if args.overwrite { "true" } else { "false" }),
            ("resumable", if args.resumable { "true" } else { "false" }),
        ])
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!(
            "getUploadParameters returned {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        ));
    }
    let params: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
    let file_path = params["filePath"].as_str().unwrap_or_default().to_string();
    let upload_id = params["uploadId"].as_str().unwrap_or_default().to_string();
    let start_chunk = params["chunkIndex"].as_u64().unwrap_or(0);

    let chunk_size = args.chunk_size.max(1);
    let expected_chunks = file_size.div_ceil(chunk_size).max(1);

    let bar = ProgressBar::new(expected_chunks);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} chunks")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(tuple.local.display().to_string());
    bar.set_position(start_chunk);

    let mut handle = std::fs::File::open(&source).map_err(|e| e.to_string())?;
    for chunk_index in start_chunk..expected_chunks {
        handle
            .seek(SeekFrom::Start(chunk_index * chunk_size))
            .map_err(|e| e.to_string())?;
        let mut buffer = Vec::with_capacity(chunk_size as usize);
        (&mut handle)
            .take(chunk_size)
            .read_to_end(&mut buffer)
            .map_err(|e| e.to_string())?;

        let mut form = reqwest::multipart::Form::new()
            .part("chunk", reqwest::multipart::Part::bytes(buffer).file_name("chunk"))
            .text("chunkSize", chunk_size.to_string())
            .text("chunkIndex", chunk_index.to_string())
            .text("expectedChunks", expected_chunks.to_string())
            .text("uploadId", upload_id.clone())
            .text("hashType", "MD5")
            .text("hashDigest", digest.clone())
            .text("filePath", file_path.clone())
            .text("fileSize", file_size.to_string())
            .text("allowOverwrite", if args.overwrite { "true" } else { "false" })
            .text("resumable", if args.resumable { "true" } else { "false" })
            .text("decompress", if args.decompress { "true" } else { "false" });
        if let Some(extension) = &file_extension {
            form = form.text("fileExtension", extension.clone());
        }

        let response = client
            .post(format!("{}/upload", args.url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            bar.abandon();
            return Err(format!(
                "chunk {} returned {}: {}",
                chunk_index,
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }
        bar.inc(1);
    }
    bar.finish();

    if args.compress {
        let _ = std::fs::remove_file(&source);
    }

    println!(
        "{} {} {} {}",
        "✓".green().bold(),
        tuple.local.display(),
        "->".bright_black(),
        file_path
    );
    Ok(())
}

// the download route is public, no bearer token required
async fn download_one(
    client: &reqwest::Client,
    args: &Args,
    tuple: &FileTuple,
) -> Result<(), String> {
    let response = client
        .get(format!("{}/download", args.url))
        .query(&[
            ("repositoryType", tuple.repository_type.as_str()),
            ("depId", tuple.dep_id.as_str()),
            ("contentType", tuple.content_type.as_str()),
            ("milestone", tuple.milestone_param()),
            ("partNumber", tuple.part_number.as_str()),
            ("contentFormat", tuple.content_format.as_str()),
            ("version", tuple.version.as_str()),
            ("hashType", "MD5"),
        ])
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!(
            "download returned {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        ));
    }

    let file_name = content_disposition_name(&response)
        .unwrap_or_else(|| format!("{}_{}", tuple.dep_id, tuple.content_type));
    let expected = response
        .headers()
        .get("rcsb_hexdigest")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let folder = tuple.local.clone();
    std::fs::create_dir_all(&folder).map_err(|e| e.to_string())?;
    let target = folder.join(&file_name);
    let body = response.bytes().await.map_err(|e| e.to_string())?;
    std::fs::write(&target, &body).map_err(|e| e.to_string())?;

    if let Some(expected) = expected {
        let actual = depo_file_repo::digest::hash_file(&target, HashKind::MD5)
            .map_err(|e| e.to_string())?;
        if !actual.eq_ignore_ascii_case(&expected) {
            return Err(format!("digest mismatch for {}", target.display()));
        }
    }

    println!("{} {}", "✓".green().bold(), target.display());
    Ok(())
}

async fn list_dir(client: &reqwest::Client, args: &Args, token: &str) -> Result<(), String> {
    let response = client
        .get(format!("{}/list-dir", args.url))
        .bearer_auth(token)
        .query(&[
            ("repositoryType", args.list[0].as_str()),
            ("depId", args.list[1].as_str()),
        ])
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("list-dir returned {}", response.status()));
    }
    let names: Vec<String> = response.json().await.map_err(|e| e.to_string())?;
    println!("{}", format!("{}/{}", args.list[0], args.list[1]).cyan().bold());
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

fn content_disposition_name(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let marker = "filename=\"";
    let start = header.find(marker)? + marker.len();
    let end = header[start..].find('"')? + start;
    Some(header[start..end].to_string())
}
