mod guarded_access;
mod metadata_blobs;
