//! Build script for compiling the externaljwt Protocol Buffer definitions

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/proto/externaljwt.proto");

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["src/proto/externaljwt.proto"], &["src/proto"])?;

    Ok(())
}
