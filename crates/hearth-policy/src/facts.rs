//! Hardware facts consumed by the local policy.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

const KIB_PER_GIB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const NVIDIA_SMI_QUERY: &str =
    "--query-gpu=name,memory.total,memory.used,memory.free,utilization.gpu";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformFacts {
    pub os: Option<String>,
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuFacts {
    pub cores: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryFacts {
    pub total_gb: Option<f64>,
    pub free_gb: Option<f64>,
    pub used_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuFacts {
    pub present: bool,
    pub name: Option<String>,
    pub vram_total_gb: Option<f64>,
    pub vram_free_gb: Option<f64>,
    pub load_pct: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityFacts {
    pub cuda: bool,
    pub cpu_only_possible: bool,
}

impl Default for CapabilityFacts {
    fn default() -> Self {
        Self {
            cuda: false,
            cpu_only_possible: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemFacts {
    pub platform: PlatformFacts,
    pub cpu: CpuFacts,
    pub memory: MemoryFacts,
    pub gpu: GpuFacts,
    pub capabilities: CapabilityFacts,
}

/// Source of [`SystemFacts`]; a fixed snapshot is itself a provider.
pub trait FactsProvider: Send + Sync {
    fn collect(&self) -> SystemFacts;
}

impl FactsProvider for SystemFacts {
    fn collect(&self) -> SystemFacts {
        self.clone()
    }
}

/// External program plus fixed arguments, run with stdin closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Stdout of a successful run; `None` when the tool is missing or fails.
    fn stdout(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                tracing::debug!(program = %self.program, status = %output.status, "host tool failed");
                None
            }
            Err(error) => {
                tracing::debug!(%error, program = %self.program, "host tool unavailable");
                None
            }
        }
    }
}

/// Reads facts from the running host. Collection never fails; anything
/// unavailable is left empty.
#[derive(Debug, Clone)]
pub struct HostFactsProvider {
    proc_root: PathBuf,
    nvidia_smi: String,
    memsize: ToolCommand,
    vm_stat: ToolCommand,
}

impl Default for HostFactsProvider {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            nvidia_smi: "nvidia-smi".to_string(),
            memsize: ToolCommand::new("sysctl", ["-n", "hw.memsize"]),
            vm_stat: ToolCommand::new("vm_stat", Vec::<String>::new()),
        }
    }
}

impl HostFactsProvider {
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    pub fn with_nvidia_smi(mut self, program: impl Into<String>) -> Self {
        self.nvidia_smi = program.into();
        self
    }

    /// Overrides the macOS memory sources (`sysctl -n hw.memsize` and
    /// `vm_stat`).
    pub fn with_darwin_memory_tools(mut self, memsize: ToolCommand, vm_stat: ToolCommand) -> Self {
        self.memsize = memsize;
        self.vm_stat = vm_stat;
        self
    }

    fn memory(&self) -> MemoryFacts {
        read_optional(&self.proc_root.join("meminfo"))
            .and_then(|text| parse_meminfo(&text))
            .unwrap_or_default()
    }

    fn darwin_memory(&self) -> MemoryFacts {
        let Some(total_bytes) = self
            .memsize
            .stdout()
            .and_then(|stdout| stdout.trim().parse::<u64>().ok())
        else {
            return MemoryFacts::default();
        };
        self.vm_stat
            .stdout()
            .and_then(|text| parse_vm_stat(&text, total_bytes))
            .unwrap_or_else(|| MemoryFacts {
                total_gb: Some(round_to(total_bytes as f64 / BYTES_PER_GIB, 1)),
                ..MemoryFacts::default()
            })
    }

    fn cpu_model(&self) -> Option<String> {
        read_optional(&self.proc_root.join("cpuinfo")).and_then(|text| parse_cpu_model(&text))
    }

    fn nvidia_gpu(&self) -> GpuFacts {
        ToolCommand::new(
            self.nvidia_smi.as_str(),
            [NVIDIA_SMI_QUERY, "--format=csv,noheader,nounits"],
        )
        .stdout()
        .and_then(|stdout| parse_nvidia_smi(&stdout))
        .unwrap_or_default()
    }

    fn collect_for_os(&self, os: String) -> SystemFacts {
        let cores = std::thread::available_parallelism()
            .ok()
            .and_then(|count| u32::try_from(count.get()).ok());

        let (memory, cpu_model, gpu) = match os.as_str() {
            "linux" => (self.memory(), self.cpu_model(), self.nvidia_gpu()),
            "darwin" => (
                self.darwin_memory(),
                None,
                GpuFacts {
                    name: Some("Apple Silicon GPU".to_string()),
                    ..GpuFacts::default()
                },
            ),
            _ => (MemoryFacts::default(), None, GpuFacts::default()),
        };

        let facts = SystemFacts {
            capabilities: CapabilityFacts {
                cuda: gpu.present,
                cpu_only_possible: true,
            },
            platform: PlatformFacts {
                os: Some(os),
                arch: Some(std::env::consts::ARCH.to_string()),
            },
            cpu: CpuFacts {
                cores,
                model: cpu_model,
            },
            memory,
            gpu,
        };
        tracing::info!(
            cpu_cores = ?facts.cpu.cores,
            ram_free_gb = ?facts.memory.free_gb,
            ram_total_gb = ?facts.memory.total_gb,
            gpu = ?facts.gpu.name,
            vram_free_gb = ?facts.gpu.vram_free_gb,
            "system facts collected"
        );
        facts
    }
}

impl FactsProvider for HostFactsProvider {
    fn collect(&self) -> SystemFacts {
        self.collect_for_os(platform_os_name(std::env::consts::OS))
    }
}

fn platform_os_name(rust_os: &str) -> String {
    match rust_os {
        "macos" => "darwin".to_string(),
        other => other.to_string(),
    }
}

fn read_optional(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

/// Parses `MemTotal` and `MemAvailable` from `/proc/meminfo` text.
pub fn parse_meminfo(text: &str) -> Option<MemoryFacts> {
    let field = |name: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|value| value.parse::<f64>().ok())
    };
    let total_kib = field("MemTotal")?;
    let available_kib = field("MemAvailable").or_else(|| field("MemFree"))?;
    let used_pct = if total_kib > 0.0 {
        Some(round_to((total_kib - available_kib) / total_kib * 100.0, 1))
    } else {
        None
    };
    Some(MemoryFacts {
        total_gb: Some(round_to(total_kib / KIB_PER_GIB, 1)),
        free_gb: Some(round_to(available_kib / KIB_PER_GIB, 1)),
        used_pct,
    })
}

/// Derives memory facts from `vm_stat` output and the physical memory size.
/// Free, inactive and speculative pages count as available.
pub fn parse_vm_stat(text: &str, total_bytes: u64) -> Option<MemoryFacts> {
    if total_bytes == 0 {
        return None;
    }
    let page_size = text
        .split_once("page size of")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u64>().ok())?;
    let pages = |name: &str| {
        text.lines()
            .find_map(|line| line.trim().strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').trim().strip_suffix('.'))
            .and_then(|value| value.parse::<u64>().ok())
    };
    let available_pages =
        pages("Pages free")? + pages("Pages inactive")? + pages("Pages speculative").unwrap_or(0);
    let total = total_bytes as f64;
    let available = (available_pages.saturating_mul(page_size) as f64).min(total);
    Some(MemoryFacts {
        total_gb: Some(round_to(total / BYTES_PER_GIB, 1)),
        free_gb: Some(round_to(available / BYTES_PER_GIB, 1)),
        used_pct: Some(round_to((total - available) / total * 100.0, 1)),
    })
}

fn parse_cpu_model(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "model name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses the first line of `nvidia-smi` csv output
/// (`name, total MiB, used MiB, free MiB, util %`).
pub fn parse_nvidia_smi(stdout: &str) -> Option<GpuFacts> {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let parts: Vec<&str> = line.splitn(5, ',').map(str::trim).collect();
    let [name, total, _used, free, util] = parts.as_slice() else {
        return None;
    };
    let total_mib = total.parse::<f64>().ok()?;
    let free_mib = free.parse::<f64>().ok()?;
    Some(GpuFacts {
        present: true,
        name: Some((*name).to_string()),
        vram_total_gb: Some(round_to(total_mib / 1024.0, 2)),
        vram_free_gb: Some(round_to(free_mib / 1024.0, 2)),
        load_pct: util.parse().ok(),
    })
}
