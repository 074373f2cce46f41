//! Build script for netbeacon-proto
//!
//! Compiles protobuf definitions using tonic-build.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "../../proto";

    let protos = [
        "netbeacon/v1/common.proto",
        "netbeacon/v1/bootstrap.proto",
        "netbeacon/v1/agent.proto",
        "netbeacon/v1/watch.proto",
    ];

    let proto_paths: Vec<_> = protos
        .iter()
        .map(|p| format!("{}/{}", proto_root, p))
        .collect();

    tonic_prost_build::configure()
        .build_server(true)
        // Client codegen is disabled: the `Connect` RPC collides with the
        // generated client's inherent `connect` constructor (E0592), and no
        // crate in this workspace uses the generated clients.
        .build_client(false)
        .compile_protos(&proto_paths, &[proto_root.to_string()])?;

    Ok(())
}
