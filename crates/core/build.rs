// Compiles the vector tile schema used by the MVT builder.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/vector_tile.proto");
    prost_build::compile_protos(&["proto/vector_tile.proto"], &["proto/"])?;
    Ok(())
}
