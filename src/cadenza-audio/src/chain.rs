use crate::host::{AudioSocketError, AudioSocketHost, HostOptions};
use crate::sink::{AudioSink, ForwardSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Routes audio from a source edge through DSP edges to a final sink.
///
/// Each DSP stage is a bidirectional edge: the host writes the previous
/// stage's output to the DSP plugin and reads the processed audio back from
/// the same connection.
pub struct DspChain {
    source: Arc<AudioSocketHost>,
    stages: Vec<Arc<AudioSocketHost>>,
}

impl DspChain {
    /// Builds and starts every edge. `stage_names` are in processing order.
    pub fn build(
        socket_dir: &Path,
        source_name: &str,
        stage_names: &[String],
        final_sink: Box<dyn AudioSink>,
        options: HostOptions,
    ) -> Result<Self, AudioSocketError> {
        let mut downstream = final_sink;
        let mut stages = Vec::with_capacity(stage_names.len());
        for name in stage_names.iter().rev() {
            let stage = Arc::new(AudioSocketHost::new(
                name.as_str(),
                socket_dir,
                downstream,
                options,
            ));
            downstream = Box::new(ForwardSink::new(Arc::clone(&stage)));
            stages.push(stage);
        }
        stages.reverse();

        let source = Arc::new(AudioSocketHost::new(
            source_name,
            socket_dir,
            downstream,
            options,
        ));

        let chain = Self { source, stages };
        for stage in &chain.stages {
            stage.start_listening()?;
        }
        chain.source.start_listening()?;
        tracing::info!(
            source = source_name,
            stages = chain.stages.len(),
            "dsp chain ready"
        );
        Ok(chain)
    }

    pub fn source(&self) -> &Arc<AudioSocketHost> {
        &self.source
    }

    pub fn stages(&self) -> &[Arc<AudioSocketHost>] {
        &self.stages
    }

    pub fn socket_paths(&self) -> Vec<PathBuf> {
        std::iter::once(&self.source)
            .chain(&self.stages)
            .map(|host| host.path().to_path_buf())
            .collect()
    }

    /// Stops the source first so nothing is pushed into a closing stage.
    pub fn release(&self) {
        self.source.release();
        for stage in &self.stages {
            stage.release();
        }
    }
}

impl Drop for DspChain {
    fn drop(&mut self) {
        self.release();
    }
}
