fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/loms.proto");

    let descriptor_path = std::path::PathBuf::from(std::env::var("OUT_DIR")?).join("loms_descriptor.bin");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(&["proto/loms.proto"], &["proto"])?;
    Ok(())
}
