use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/platform/windows/blit.hlsl");
    println!("cargo:rustc-check-cfg=cfg(has_precompiled_blit)");
    println!("cargo:rerun-if-env-changed=DRIFT_CAPTURE_FXC_PATH");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let hlsl_path = PathBuf::from("src/platform/windows/blit.hlsl");

    if !hlsl_path.exists() {
        return;
    }

    // Optional escape hatch:
    // DRIFT_CAPTURE_PRECOMPILE_SHADER=0 disables build-time fxc compilation.
    println!("cargo:rerun-if-env-changed=DRIFT_CAPTURE_PRECOMPILE_SHADER");
    let precompile_enabled = env::var("DRIFT_CAPTURE_PRECOMPILE_SHADER")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(true);
    if !precompile_enabled {
        println!(
            "cargo:warning=DRIFT_CAPTURE_PRECOMPILE_SHADER is disabled; will use runtime D3DCompile fallback"
        );
        return;
    }

    let vs_path = out_dir.join("blit_vs.cso");
    let ps_path = out_dir.join("blit_ps.cso");
    let vs = compile_with_fxc(&hlsl_path, &vs_path, "vs_main", "vs_5_0");
    let ps = compile_with_fxc(&hlsl_path, &ps_path, "ps_main", "ps_5_0");
    match (vs, ps) {
        (Ok(()), Ok(())) => {
            // Tell rustc where the compiled shaders are so d3d11.rs can
            // include_bytes! them, and set a cfg flag to enable that path.
            println!("cargo:rustc-env=BLIT_VS_CSO_PATH={}", vs_path.display());
            println!("cargo:rustc-env=BLIT_PS_CSO_PATH={}", ps_path.display());
            println!("cargo:rustc-cfg=has_precompiled_blit");
        }
        (vs, ps) => {
            let detail = [vs.err(), ps.err()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" | ");
            println!(
                "cargo:warning=failed to precompile blit shaders with fxc ({detail}); will use runtime D3DCompile fallback"
            );
        }
    }
}

fn compile_with_fxc(
    hlsl_path: &Path,
    cso_path: &Path,
    entry_point: &str,
    profile: &str,
) -> Result<(), String> {
    let mut attempts = Vec::new();
    let mut attempted = false;
    for fxc in fxc_candidates() {
        if !is_path_lookup(&fxc) && !fxc.is_file() {
            continue;
        }
        attempted = true;
        match Command::new(&fxc)
            .args(["/T", profile, "/E", entry_point, "/O3", "/Fo"])
            .arg(cso_path)
            .arg(hlsl_path)
            .output()
        {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                attempts.push(format!("{}: {}", fxc.display(), summarize_output(&output)))
            }
            Err(err) => attempts.push(format!("{}: {}", fxc.display(), err)),
        }
    }

    if !attempted {
        return Err(
            "no usable fxc.exe found (PATH/Windows SDK). set DRIFT_CAPTURE_FXC_PATH to an explicit fxc path".to_string()
        );
    }

    Err(attempts.join(" | "))
}

fn is_path_lookup(path: &Path) -> bool {
    path.file_name().is_some()
        && path.parent().is_none()
        && path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("fxc.exe"))
}

fn summarize_output(output: &Output) -> String {
    let status = output
        .status
        .code()
        .map_or_else(|| "terminated".to_string(), |code| format!("exit {code}"));
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut diagnostic = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "no compiler diagnostic output".to_string()
    };
    if diagnostic.len() > 260 {
        diagnostic.truncate(260);
        diagnostic.push_str("...");
    }
    format!("{status}, {diagnostic}")
}

fn fxc_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(path) = env::var("DRIFT_CAPTURE_FXC_PATH") {
        let path = path.trim();
        if !path.is_empty() {
            out.push(PathBuf::from(path));
        }
    }

    out.push(PathBuf::from("fxc.exe"));

    if let Ok(bin_path) = env::var("WindowsSdkVerBinPath") {
        let bin = PathBuf::from(bin_path);
        out.push(bin.join("x64").join("fxc.exe"));
        out.push(bin.join("x86").join("fxc.exe"));
    }

    if let (Ok(sdk_dir), Ok(sdk_version)) =
        (env::var("WindowsSdkDir"), env::var("WindowsSDKVersion"))
    {
        let version = sdk_version.trim_matches(|c| c == '\\' || c == '/');
        if !version.is_empty() {
            let bin = PathBuf::from(sdk_dir).join("bin").join(version);
            out.push(bin.join("x64").join("fxc.exe"));
            out.push(bin.join("x86").join("fxc.exe"));
        }
    }

    out
}
