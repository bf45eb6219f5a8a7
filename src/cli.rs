use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::{self, BatchOutcome, GenerateOptions, WorkerPool};
use crate::verify::{ApkVerifier, StructuralVerifier};

#[derive(Parser, Debug)]
#[command(
    name = "chankit",
    version,
    about = "Inject, read and remove distribution channels in signed APKs",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Показать схемы подписи пакета
    Sign {
        #[arg(long)]
        apk: PathBuf,
    },
    /// Прочитать канал (сначала signing block, затем ZIP-комментарий)
    Get {
        #[arg(long)]
        apk: PathBuf,
    },
    /// Сгенерировать канальные APK
    Put {
        #[arg(long)]
        apk: PathBuf,
        /// Список каналов через запятую
        #[arg(long)]
        channels: Option<String>,
        /// Файл каналов: канал на строку, # начинает комментарий
        #[arg(long)]
        channel_file: Option<PathBuf>,
        /// Каталог вывода, либо точный путь *.apk для одного канала
        #[arg(long)]
        output: PathBuf,
        /// Пропустить проверку выходных файлов
        #[arg(long, default_value_t = false)]
        fast: bool,
        /// Писать каналы параллельно (только V1-схема)
        #[arg(long, default_value_t = false)]
        multi_thread: bool,
        /// Размер пула; по умолчанию — число доступных ядер
        #[arg(long)]
        threads: Option<usize>,
        /// Не буферизовать content-регион (v2/v3)
        #[arg(long, default_value_t = false)]
        low_memory: bool,
        /// Печатать итог пакета в JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Убрать канал из пакета на месте
    Remove {
        #[arg(long)]
        apk: PathBuf,
        #[arg(long, default_value_t = false)]
        low_memory: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Sign { apk } => {
            let schemes = StructuralVerifier.verify(&apk)?;
            println!("Signature schemes of {}:", apk.display());
            println!("  v1 (jar)           = {}", schemes.v1);
            println!("  v2 (signing block) = {}", schemes.v2);
            println!("  v3 (signing block) = {}", schemes.v3);
            if !schemes.any() {
                println!("  (not signed)");
            }
        }
        Cmd::Get { apk } => match pipeline::read_channel(&apk)? {
            Some(channel) => println!("channel = {}", channel),
            None => println!("no channel found in {}", apk.display()),
        },
        Cmd::Put {
            apk,
            channels,
            channel_file,
            output,
            fast,
            multi_thread,
            threads,
            low_memory,
            json,
        } => {
            let channels = match (channels, channel_file) {
                (Some(list), None) => pipeline::parse_channel_list(&list),
                (None, Some(file)) => pipeline::read_channel_file(&file)?,
                _ => bail!("pass exactly one of --channels or --channel-file"),
            };
            let opts = GenerateOptions {
                fast_mode: fast,
                low_memory,
            };
            let pool = if multi_thread {
                Some(match threads {
                    Some(n) => WorkerPool::new(n),
                    None => WorkerPool::with_available_parallelism(),
                })
            } else {
                None
            };
            let outcome = pipeline::generate(
                &apk,
                &output,
                &channels,
                &opts,
                &StructuralVerifier,
                pool.as_ref(),
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                match &outcome {
                    BatchOutcome::AlreadyTagged { channel } => {
                        println!(
                            "base apk already carries channel '{}', nothing generated",
                            channel
                        );
                    }
                    BatchOutcome::Generated(summary) => {
                        println!(
                            "generated {}/{} channel apks",
                            summary.succeeded, summary.requested
                        );
                        for out in &summary.outputs {
                            println!("  {}", out);
                        }
                        for failure in &summary.failures {
                            println!("  FAILED {}: {}", failure.channel, failure.error);
                        }
                    }
                }
            }
        }
        Cmd::Remove { apk, low_memory } => {
            if pipeline::remove_channel(&apk, low_memory)? {
                println!("channel removed from {}", apk.display());
            } else {
                println!("no channel in {}", apk.display());
            }
        }
    }
    Ok(())
}
