// ─── msc Core ───
// Declarative mods manifest for a containerised Minecraft server.
//
// Architecture:
//   core/
//     manifest/    Manifest model, schema migration, atomic store
//     scanner/     Archive discovery + SHA-256 hashing
//     reconcile/   Manifest vs filesystem classification
//     sources/     Resolver registry: local, url, modrinth, curseforge
//     downloader/  Rate-limited fetcher + verified staging
//     server/      Server lifecycle collaborator (docker compose)
//     guard.rs     Refuses file mutations while the server runs
//     mutation/    add, remove, toggle, purge, sync, repair
//     state/       Settings from .msc.json, env and user config

pub mod downloader;
pub mod error;
pub mod guard;
pub mod http;
pub mod manifest;
pub mod mutation;
pub mod reconcile;
pub mod scanner;
pub mod server;
pub mod sources;
pub mod state;
