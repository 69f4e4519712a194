mod sessions;
mod snapshots;
