pub mod draw_map;
pub mod extract_rails;

use std::path::Path;
use log::{info, error};

use crate::errors::{Error, Result};


pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn process(&mut self, dir: &Path) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
        } else {
            info!(etl_name = self.etl_name(); "Extracting");
            let input = self.extract(dir)
                .map_err(|err| log_failure(self.etl_name(), "Extraction", err))?;

            info!(etl_name = self.etl_name(); "Transforming");
            let output = self.transform(input)
                .map_err(|err| log_failure(self.etl_name(), "Transformation", err))?;

            info!(etl_name = self.etl_name(); "Loading");
            self.load(dir, output)
                .map_err(|err| log_failure(self.etl_name(), "Loading", err))?;
        }
        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }
}

fn log_failure(etl_name: &str, phase: &str, err: Error) -> Error {
    error!(
        etl_name = etl_name,
        phase = phase,
        kind = err.kind.as_str(),
        err = err.message.as_str();
        "ETL phase failed with error"
    );
    err
}
