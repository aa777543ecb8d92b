use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ShadowSection {
    granule_shift: Option<u32>,
    address_bits: Option<u32>,
}

#[derive(Deserialize, Default)]
struct LayoutSection {
    min_header_redzone: Option<usize>,
    min_trailer_redzone: Option<usize>,
    max_alignment: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    shadow: ShadowSection,
    #[serde(default)]
    layout: LayoutSection,
}

struct ResolvedConfig {
    granule_shift: u32,
    granule_size: usize,
    address_bits: u32,
    min_header_redzone: usize,
    min_trailer_redzone: usize,
    max_alignment: usize,
}

/// Round up to the next multiple of `align` (must be a power of 2).
fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

fn resolve_config(cfg: &Config) -> ResolvedConfig {
    let granule_shift = cfg.shadow.granule_shift.unwrap_or(3);
    assert!(
        (3..=6).contains(&granule_shift),
        "granule_shift ({}) must be in 3..=6",
        granule_shift
    );
    let granule_size = 1usize << granule_shift;

    let address_bits = cfg.shadow.address_bits.unwrap_or(48);
    assert!(
        (32..=57).contains(&address_bits),
        "address_bits ({}) must be in 32..=57",
        address_bits
    );
    // The shadow radix tree needs at least root + leaf bits of granule index.
    assert!(
        address_bits - granule_shift >= 30,
        "address_bits - granule_shift ({}) must be >= 30",
        address_bits - granule_shift
    );

    let min_header_redzone = cfg.layout.min_header_redzone.unwrap_or(16);
    let min_trailer_redzone = cfg.layout.min_trailer_redzone.unwrap_or(8);
    let max_alignment = cfg.layout.max_alignment.unwrap_or(4096);

    assert!(min_header_redzone > 0, "min_header_redzone must be > 0");
    assert!(min_trailer_redzone > 0, "min_trailer_redzone must be > 0");
    assert!(
        max_alignment.is_power_of_two(),
        "max_alignment ({}) must be a power of 2",
        max_alignment
    );
    assert!(
        max_alignment >= granule_size,
        "max_alignment ({}) must be >= granule size ({})",
        max_alignment,
        granule_size
    );
    assert!(
        max_alignment <= 1 << 20,
        "max_alignment ({}) must be <= 1 MiB",
        max_alignment
    );

    ResolvedConfig {
        granule_shift,
        granule_size,
        address_bits,
        min_header_redzone: round_up(min_header_redzone, granule_size),
        min_trailer_redzone: round_up(min_trailer_redzone, granule_size),
        max_alignment,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/rtasan.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const GRANULE_SHIFT: usize = {};\n\
         pub const GRANULE_SIZE: usize = {};\n\
         pub const ADDRESS_BITS: usize = {};\n\
         pub const MIN_HEADER_REDZONE: usize = {};\n\
         pub const MIN_TRAILER_REDZONE: usize = {};\n\
         pub const MAX_ALIGNMENT: usize = {};\n",
        cfg.granule_shift,
        cfg.granule_size,
        cfg.address_bits,
        cfg.min_header_redzone,
        cfg.min_trailer_redzone,
        cfg.max_alignment,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=RTASAN_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("RTASAN_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");
    let resolved = resolve_config(&config);

    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
