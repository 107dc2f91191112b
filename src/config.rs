use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub model_path: String,
    pub background_data_path: String,
}

impl Config {
    pub fn load() -> Self {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        let model_path =
            env::var("MODEL_PATH").unwrap_or_else(|_| "models/forest.json".to_string());

        let background_data_path = env::var("BACKGROUND_DATA_PATH")
            .unwrap_or_else(|_| "models/background_sample.csv".to_string());

        Config {
            port,
            model_path,
            background_data_path,
        }
    }
}
