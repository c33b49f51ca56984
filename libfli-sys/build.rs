use std::env;
use std::path::PathBuf;

// These helper functions are only used when libfli-sdk feature is enabled
#[allow(dead_code)]
/// Print a boxed error message for visibility in cargo output
fn print_env_error(title: &str, details: &[&str], fixes: &[&str]) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║ LIBFLI BUILD ERROR: {:<45} ║", title);
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    for detail in details {
        eprintln!("║ {:<66} ║", detail);
    }
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    eprintln!("║ HOW TO FIX:                                                      ║");
    for fix in fixes {
        eprintln!("║   {:<64} ║", fix);
    }
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();
}

#[allow(dead_code)]
/// Check common install prefixes for libfli.h
fn find_libfli_prefix() -> Option<PathBuf> {
    let candidates = ["/usr/local", "/usr", "/opt/fli", "/opt/libfli"];

    for path in &candidates {
        let p = PathBuf::from(path);
        if p.join("include").join("libfli.h").exists() {
            return Some(p);
        }
    }
    None
}

#[allow(dead_code)]
/// Print diagnostic information about the environment
fn print_env_diagnostics() {
    eprintln!();
    eprintln!("=== libfli Build Diagnostics ===");
    eprintln!("LIBFLI_DIR: {:?}", env::var("LIBFLI_DIR").ok());
    eprintln!("LIBFLI_LIB_DIR: {:?}", env::var("LIBFLI_LIB_DIR").ok());
    eprintln!("LIBRARY_PATH: {:?}", env::var("LIBRARY_PATH").ok());
    eprintln!("LD_LIBRARY_PATH: {:?}", env::var("LD_LIBRARY_PATH").ok());

    if let Some(found) = find_libfli_prefix() {
        eprintln!("Auto-detected libfli at: {:?}", found);
    }
    eprintln!("================================");
    eprintln!();
}

fn main() {
    // Only run bindgen and linking logic if the `libfli-sdk` feature is enabled.
    #[cfg(feature = "libfli-sdk")]
    {
        println!("cargo:rerun-if-env-changed=LIBFLI_DIR");
        println!("cargo:rerun-if-env-changed=LIBFLI_LIB_DIR");
        println!("cargo:rerun-if-env-changed=LIBRARY_PATH");
        println!("cargo:rerun-if-changed=wrapper.h");

        let prefix = match env::var("LIBFLI_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                if let Some(found) = find_libfli_prefix() {
                    println!(
                        "cargo:warning=LIBFLI_DIR not set, auto-detected: {}",
                        found.display()
                    );
                    found
                } else {
                    print_env_diagnostics();
                    print_env_error(
                        "LIBFLI_DIR not set",
                        &[
                            "The libfli-sdk feature requires libfli.h and libfli.",
                            "This environment variable tells the build where to find them.",
                        ],
                        &["export LIBFLI_DIR=/usr/local"],
                    );
                    panic!("LIBFLI_DIR environment variable must be set when `libfli-sdk` feature is enabled.");
                }
            }
        };

        let include_path = prefix.join("include");
        let lib_path = match env::var("LIBFLI_LIB_DIR") {
            Ok(lib_dir) => PathBuf::from(lib_dir),
            Err(_) => prefix.join("lib"),
        };

        if !include_path.join("libfli.h").exists() {
            print_env_diagnostics();
            print_env_error(
                "libfli.h not found",
                &[&format!("Expected header at: {}", include_path.display())],
                &["Set correct prefix: export LIBFLI_DIR=/path/to/prefix"],
            );
            panic!("libfli.h does not exist under {:?}", include_path);
        }

        if !lib_path.exists() {
            println!(
                "cargo:warning=libfli lib path does not exist: {}",
                lib_path.display()
            );
            println!("cargo:warning=Linker will search LIBRARY_PATH and standard paths");
        }

        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .clang_arg(format!("-I{}", include_path.display()))
            // Every public libfli entry point starts with `FLI`
            .allowlist_function("FLI.*")
            .allowlist_type("flidev_t|flidomain_t|flimode_t|flistatus_t|flibitdepth_t")
            .allowlist_var("FLIDOMAIN_.*")
            .allowlist_var("FLIDEVICE_.*")
            .generate()
            .expect("Unable to generate bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("Couldn't write bindings!");

        println!("cargo:rustc-link-search=native={}", lib_path.display());
        println!("cargo:rustc-link-lib=fli");
    }
    #[cfg(not(feature = "libfli-sdk"))]
    {
        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        std::fs::write(
            out_path.join("bindings.rs"),
            "// Dummy bindings when libfli-sdk feature is not enabled\npub mod libfli_bindings {}\n",
        )
        .expect("Couldn't write dummy bindings!");
    }
}
