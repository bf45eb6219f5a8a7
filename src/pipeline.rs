//! pipeline — пакетная генерация канальных APK.
//!
//! Порядок на один базовый файл: определить схему подписи (сначала
//! v2/v3 по signing block, затем v1 по JAR-подписи), проверить, что
//! базовый файл ещё не несёт канал, затем на каждый канал из списка
//! выполнить copy -> write -> verify. Ошибка одного канала не роняет
//! остальных; структурная ошибка базового файла роняет весь пакет до
//! создания каких-либо выходных файлов.
//!
//! Многопоточность есть только у V1-пути: независимые задачи каналов
//! исполняются на пуле, который конструирует и владеет вызывающий.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::section;
use crate::util;
use crate::verify::ApkVerifier;
use crate::WriteOutcome;
use crate::{v1, v2};

/// Схема подписи базового файла, определяющая способ записи канала.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    V1,
    V2V3,
}

/// Опции генерации пакета.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    /// Пропустить обратное чтение и проверку подписи после записи.
    pub fast_mode: bool,
    /// Не буферизовать content-регион (v2/v3 пишет поверх копии).
    pub low_memory: bool,
}

#[derive(Debug, Serialize)]
pub struct JobFailure {
    pub channel: String,
    pub error: String,
}

/// Итог пакета: сколько каналов запрошено, сколько получилось и какие
/// файлы вышли.
#[derive(Debug, Serialize)]
pub struct GenerationSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub outputs: Vec<String>,
    pub failures: Vec<JobFailure>,
}

/// Исход пакета целиком. Уже проставленный канал в базовом файле — не
/// ошибка, а информационный пропуск.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    AlreadyTagged { channel: String },
    Generated(GenerationSummary),
}

// -------- список каналов --------

/// Разобрать литеральный список каналов через запятую.
pub fn parse_channel_list(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Прочитать файл каналов: канал на строку, `#` начинает комментарий
/// до конца строки, пустые строки пропускаются.
pub fn read_channel_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read channel file {}", path.display()))?;
    let channels: Vec<String> = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    Ok(channels)
}

// -------- имена выходных файлов --------

/// Имя канального APK: вхождения "base" заменяются на канал, иначе
/// канал идёт префиксом.
pub fn channel_apk_name(base_name: &str, channel: &str) -> String {
    if base_name.contains("base") {
        base_name.replace("base", channel)
    } else {
        format!("{}-{}", channel, base_name)
    }
}

fn is_exact_apk_path(output: &Path) -> bool {
    output
        .extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("apk"))
}

fn dest_path(output: &Path, base_name: &str, channel: &str) -> PathBuf {
    if is_exact_apk_path(output) {
        output.to_path_buf()
    } else {
        output.join(channel_apk_name(base_name, channel))
    }
}

// -------- определение схемы --------

/// Определить схему подписи: сначала signing block (v2/v3), затем
/// JAR-подпись (v1). Ни той ни другой — ошибка всего пакета.
pub fn detect_scheme(apk: &Path) -> Result<SigningScheme> {
    if v2::contains_v2_signature(apk) || v2::contains_v3_signature(apk) {
        return Ok(SigningScheme::V2V3);
    }
    if v1::contains_v1_signature(apk) {
        return Ok(SigningScheme::V1);
    }
    bail!("undetermined signing scheme for {}", apk.display());
}

fn existing_channel(apk: &Path, scheme: SigningScheme) -> Result<Option<String>> {
    match scheme {
        SigningScheme::V2V3 => v2::read_channel(apk),
        SigningScheme::V1 => {
            if v1::contains_v1_magic(apk)? {
                v1::read_channel(apk)
            } else {
                Ok(None)
            }
        }
    }
}

/// Прочитать канал из файла: сначала signing block, затем
/// ZIP-комментарий.
pub fn read_channel(apk: &Path) -> Result<Option<String>> {
    if let Some(channel) = v2::read_channel(apk)? {
        return Ok(Some(channel));
    }
    v1::read_channel(apk)
}

/// Убрать канал из файла на месте, по определённой схеме подписи.
/// false — канала не было.
pub fn remove_channel(apk: &Path, low_memory: bool) -> Result<bool> {
    match detect_scheme(apk)? {
        SigningScheme::V2V3 => {
            let info = section::locate(apk, low_memory)?;
            v2::remove_channel(&info, apk)
        }
        SigningScheme::V1 => v1::remove_channel(apk),
    }
}

// -------- пул задач --------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Ограниченный пул для независимых задач каналов. Конструируется
/// вызывающим и передаётся в конвейер явно.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    /// Минимум два потока независимо от запрошенного размера.
    pub fn new(threads: usize) -> Self {
        WorkerPool {
            threads: threads.max(2),
        }
    }

    pub fn with_available_parallelism() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        WorkerPool::new(threads)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Выполнить задачи и вернуть результаты в исходном порядке.
    ///
    /// Каждая задача учитывается ровно один раз, в том числе при
    /// панике внутри неё: паника превращается в Err соответствующего
    /// слота, соседние задачи продолжаются.
    pub fn run<T, F>(&self, jobs: Vec<F>) -> Vec<Result<T>>
    where
        F: FnOnce() -> Result<T> + Send,
        T: Send,
    {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }
        let queue: Mutex<VecDeque<(usize, F)>> = Mutex::new(jobs.into_iter().enumerate().collect());
        let results: Mutex<Vec<Option<Result<T>>>> =
            Mutex::new((0..total).map(|_| None).collect());
        let workers = self.threads.min(total);

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let next = lock(&queue).pop_front();
                    let Some((idx, job)) = next else {
                        break;
                    };
                    let out = panic::catch_unwind(AssertUnwindSafe(job))
                        .unwrap_or_else(|_| Err(anyhow!("channel job panicked")));
                    lock(&results)[idx] = Some(out);
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(|p| p.into_inner())
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(anyhow!("channel job was dropped"))))
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::with_available_parallelism()
    }
}

// -------- генерация --------

fn verify_output(
    dest: &Path,
    channel: &str,
    scheme: SigningScheme,
    verifier: &dyn ApkVerifier,
) -> Result<()> {
    let read_back = match scheme {
        SigningScheme::V1 => v1::read_channel(dest)?,
        SigningScheme::V2V3 => v2::read_channel(dest)?,
    };
    if read_back.as_deref() != Some(channel) {
        bail!(
            "channel readback mismatch in {}: wrote '{}', read {:?}",
            dest.display(),
            channel,
            read_back
        );
    }
    let schemes = verifier.verify(dest)?;
    let signed = match scheme {
        SigningScheme::V1 => schemes.v1,
        SigningScheme::V2V3 => schemes.v2 || schemes.v3,
    };
    if !signed {
        bail!("signature check failed for {}", dest.display());
    }
    Ok(())
}

fn v1_job(
    base: &Path,
    dest: &Path,
    channel: &str,
    fast_mode: bool,
    verifier: &dyn ApkVerifier,
) -> Result<()> {
    util::copy_file(base, dest)?;
    match v1::write_channel(dest, channel)? {
        WriteOutcome::Written => {}
        WriteOutcome::AlreadyTagged(existing) => {
            bail!("fresh copy unexpectedly carries channel '{}'", existing);
        }
    }
    if !fast_mode {
        verify_output(dest, channel, SigningScheme::V1, verifier)?;
    }
    Ok(())
}

fn summarize(
    channels: &[String],
    dests: Vec<PathBuf>,
    results: Vec<Result<()>>,
) -> GenerationSummary {
    let mut outputs = Vec::new();
    let mut failures = Vec::new();
    for ((channel, dest), result) in channels.iter().zip(dests).zip(results) {
        match result {
            Ok(()) => outputs.push(dest.display().to_string()),
            Err(e) => {
                error!("channel '{}' failed: {:#}", channel, e);
                // Недописанный выход не оставляем.
                let _ = std::fs::remove_file(&dest);
                failures.push(JobFailure {
                    channel: channel.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    GenerationSummary {
        requested: channels.len(),
        succeeded: outputs.len(),
        outputs,
        failures,
    }
}

/// Сгенерировать канальные APK для всех каналов списка.
///
/// `pool` задействуется только V1-схемой; v2/v3 генерация строго
/// последовательна (снимок секций переиспользуется между записями).
pub fn generate(
    base: &Path,
    output: &Path,
    channels: &[String],
    opts: &GenerateOptions,
    verifier: &dyn ApkVerifier,
    pool: Option<&WorkerPool>,
) -> Result<BatchOutcome> {
    if channels.is_empty() {
        bail!("channel list is empty");
    }
    if is_exact_apk_path(output) && channels.len() > 1 {
        bail!(
            "output {} names a single apk but {} channels were requested",
            output.display(),
            channels.len()
        );
    }
    let base_name = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("base apk path has no usable file name: {}", base.display()))?;

    let started = Instant::now();
    let scheme = detect_scheme(base)?;
    info!("{}: signing scheme {:?}", base.display(), scheme);

    if let Some(channel) = existing_channel(base, scheme)? {
        info!(
            "base apk {} already carries channel '{}', batch skipped",
            base.display(),
            channel
        );
        return Ok(BatchOutcome::AlreadyTagged { channel });
    }

    let dests: Vec<PathBuf> = channels
        .iter()
        .map(|c| dest_path(output, base_name, c))
        .collect();

    let results: Vec<Result<()>> = match scheme {
        SigningScheme::V1 => match pool {
            Some(pool) => {
                debug!("running v1 batch on {} worker threads", pool.threads());
                let jobs: Vec<_> = channels
                    .iter()
                    .zip(&dests)
                    .map(|(channel, dest)| {
                        let fast = opts.fast_mode;
                        move || v1_job(base, dest, channel, fast, verifier)
                    })
                    .collect();
                pool.run(jobs)
            }
            None => channels
                .iter()
                .zip(&dests)
                .map(|(channel, dest)| v1_job(base, dest, channel, opts.fast_mode, verifier))
                .collect(),
        },
        SigningScheme::V2V3 => {
            // Структурная ошибка базового файла роняет пакет целиком,
            // до первого выходного файла.
            let info = section::locate(base, opts.low_memory)?;
            channels
                .iter()
                .zip(&dests)
                .map(|(channel, dest)| {
                    if info.low_memory {
                        util::copy_file(base, dest)?;
                    }
                    match v2::write_channel(&info, dest, channel)? {
                        WriteOutcome::Written => {}
                        WriteOutcome::AlreadyTagged(existing) => {
                            bail!("base apk unexpectedly carries channel '{}'", existing);
                        }
                    }
                    if !opts.fast_mode {
                        verify_output(dest, channel, SigningScheme::V2V3, verifier)?;
                    }
                    Ok(())
                })
                .collect()
        }
    };

    let summary = summarize(channels, dests, results);
    info!(
        "generated {}/{} channel apks from {} in {:?}",
        summary.succeeded,
        summary.requested,
        base.display(),
        started.elapsed()
    );
    Ok(BatchOutcome::Generated(summary))
}
