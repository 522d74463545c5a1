//! Build script: embeds the git hash and checks GPU toolkits.
//!
//! The toolkit checks run before whisper-rs-sys starts compiling, so a missing
//! SDK fails fast with an actionable message instead of a CMake error.

use std::process::Command;

fn main() {
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "cuda") {
        require_tool("nvcc", &["--version"], "CUDA toolkit", "https://developer.nvidia.com/cuda-downloads");
        if let Some((major, minor)) = cuda_toolkit_version() {
            println!("cargo::warning=CUDA {}.{} detected", major, minor);
        }
    }
    if cfg!(feature = "vulkan") {
        require_tool("vulkaninfo", &["--summary"], "Vulkan SDK", "https://vulkan.lunarg.com/");
    }
    if cfg!(feature = "openblas") && !openblas_available() {
        panic!(
            "\n\nOpenBLAS not found.\n  Install: sudo apt install libopenblas-dev\n  \
             Or build without the `openblas` feature.\n"
        );
    }
}

fn require_tool(tool: &str, args: &[&str], what: &str, install_url: &str) {
    let found = Command::new(tool)
        .args(args)
        .output()
        .is_ok_and(|out| out.status.success());
    if !found {
        panic!(
            "\n\n`{tool}` not found: the {what} is not installed.\n  Install: {install_url}\n  \
             Or build without GPU features: cargo build --release --features whisper\n"
        );
    }
}

fn cuda_toolkit_version() -> Option<(u32, u32)> {
    let output = Command::new("nvcc").arg("--version").output().ok()?;
    parse_cuda_version(&String::from_utf8_lossy(&output.stdout))
}

/// Parse "release X.Y" from nvcc --version output.
fn parse_cuda_version(text: &str) -> Option<(u32, u32)> {
    let after = &text[text.find("release ")? + 8..];
    let version_str = &after[..after.find(',')?];
    let mut parts = version_str.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn openblas_available() -> bool {
    let pkg_config_ok = Command::new("pkg-config")
        .args(["--exists", "openblas"])
        .status()
        .is_ok_and(|s| s.success());

    pkg_config_ok
        || [
            "/usr/lib/x86_64-linux-gnu/libopenblas.so",
            "/usr/lib/libopenblas.so",
            "/usr/lib64/libopenblas.so",
        ]
        .iter()
        .any(|p| std::path::Path::new(p).exists())
}
