use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=src/gpu/shaders");

    // shaders are only needed by the vulkan backend, so default builds never require glslc
    if std::env::var_os("CARGO_FEATURE_VULKAN").is_none() {
        return;
    }

    // write compiled shaders to OUT_DIR/shaders
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set")).join("shaders");
    fs::create_dir_all(&out_dir).expect("failed to create OUT_DIR/shaders");

    let entries = fs::read_dir("src/gpu/shaders").expect("missing src/gpu/shaders");

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("comp") {
            continue;
        }

        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap();
        let out_path = out_dir.join(file_name.replace(".comp", ".spv"));

        let result = Command::new("glslc")
            .arg("--target-env=vulkan1.0")
            .arg("-fshader-stage=compute")
            .arg("-o")
            .arg(&out_path)
            .arg(&path)
            .output();

        match result {
            Ok(o) if o.status.success() => {}
            Ok(o) => panic!(
                "glslc failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&o.stderr)
            ),
            Err(e) => panic!(
                "failed to run glslc for {}: {}. Install glslc or the Vulkan SDK.",
                path.display(),
                e
            ),
        }
    }
}
