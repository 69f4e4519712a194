mod config_file;
mod wire;
