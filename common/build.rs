use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{input}"))
        .output_type(format!("crate::proto::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let agent = Service::builder()
        .name("Agent")
        .package("mcing")
        .comment("Console bridge colocated with every managed server")
        .method(unary("reload", "Reload", "ReloadRequest", "ReloadResponse"))
        .method(unary(
            "sync_whitelist",
            "SyncWhitelist",
            "SyncWhitelistRequest",
            "SyncWhitelistResponse",
        ))
        .method(unary("sync_ops", "SyncOps", "SyncOpsRequest", "SyncOpsResponse"))
        .method(unary("save_off", "SaveOff", "SaveOffRequest", "SaveOffResponse"))
        .method(unary(
            "save_all_flush",
            "SaveAllFlush",
            "SaveAllFlushRequest",
            "SaveAllFlushResponse",
        ))
        .method(unary("save_on", "SaveOn", "SaveOnRequest", "SaveOnResponse"))
        .build();

    Builder::new().compile(&[agent]);
    println!("cargo:rerun-if-changed=build.rs");
}
