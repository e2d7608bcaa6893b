use std::io::Result;

fn main() -> Result<()> {
    prost_build::compile_protos(&["proto/rpc_packet.proto"], &["proto/"])?;
    Ok(())
}
