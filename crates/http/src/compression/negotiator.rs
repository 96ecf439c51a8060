use crate::compression::Compressor;
use crate::protocol::Request;
use http::header;

/// Which content codings are enabled, and at which level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    pub gzip_enabled: bool,
    pub gzip_level: u32,
    pub deflate_enabled: bool,
    pub deflate_level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { gzip_enabled: true, gzip_level: 2, deflate_enabled: true, deflate_level: 2 }
    }
}

/// Picks a [`Compressor`] for a request from its `Accept-Encoding` header.
///
/// Server preference wins: the first configured method the client accepts is chosen,
/// whatever order the client listed its codings in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionNegotiator {
    methods: Vec<Compressor>,
}

impl CompressionNegotiator {
    /// A negotiator with no methods; it never selects anything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        let mut negotiator = Self::new();
        negotiator.load(config);
        negotiator
    }

    /// Replaces the method list with the one described by `config`.
    pub fn load(&mut self, config: &CompressionConfig) {
        self.methods.clear();
        if config.gzip_enabled {
            self.methods.push(Compressor::Gzip { level: config.gzip_level });
        }
        if config.deflate_enabled {
            self.methods.push(Compressor::Deflate { level: config.deflate_level });
        }
    }

    pub fn methods(&self) -> &[Compressor] {
        &self.methods
    }

    /// Returns the method to apply to the response for `request`, if any.
    pub fn negotiate(&self, request: &Request) -> Option<Compressor> {
        let accepted = request.headers().get(header::ACCEPT_ENCODING.as_str())?;
        let tokens: Vec<String> = accepted.split(',').filter_map(accepted_coding).collect();

        self.methods.iter().find(|method| tokens.iter().any(|token| token == method.name())).copied()
    }
}

/// Lowercased coding name of one `Accept-Encoding` element, `None` when it is refused with
/// `q=0`.
fn accepted_coding(element: &str) -> Option<String> {
    let mut parts = element.split(';');
    let coding = parts.next()?.trim().to_ascii_lowercase();

    let refused = parts.any(|param| {
        param
            .trim()
            .split_once('=')
            .is_some_and(|(key, value)| key.trim().eq_ignore_ascii_case("q") && is_zero_quality(value.trim()))
    });

    (!coding.is_empty() && !refused).then_some(coding)
}

fn is_zero_quality(value: &str) -> bool {
    value.parse::<f32>().is_ok_and(|q| q <= 0.0)
}
