use crate::error::Error;
use crate::frame::Frame;

/// A single `name=value` or bare flag inside a `Sec-WebSocket-Extensions`
/// offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    pub name: String,
    pub value: Option<String>,
}

/// One extension entry from a `Sec-WebSocket-Extensions` header: the
/// extension name plus its parameter bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    pub fn param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|param| param.name == name)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.param(name).is_some()
    }
}

/// Parses a `Sec-WebSocket-Extensions` header value: a comma-separated list
/// of `name; k=v; flag` entries. Quotes around parameter values are peeled
/// off, names are lowercased.
pub fn parse_extensions_header(value: &str) -> Vec<ExtensionOffer> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(parse_extension_entry)
        .collect()
}

fn parse_extension_entry(entry: &str) -> ExtensionOffer {
    let mut parts = entry.split(';');
    let name = parts.next().unwrap_or_default().trim().to_lowercase();

    let params = parts
        .filter(|part| !part.trim().is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => ExtensionParam {
                name: key.trim().to_lowercase(),
                value: Some(value.trim().trim_matches('"').to_string()),
            },
            None => ExtensionParam {
                name: part.trim().to_lowercase(),
                value: None,
            },
        })
        .collect();

    ExtensionOffer { name, params }
}

/// A per-connection frame transformer. Outbound data frames pass the
/// configured extensions in list order before masking; inbound data frames
/// pass them in reverse order right after unmasking. Control frames never
/// reach an extension.
pub trait WebSocketExtension: Send {
    fn name(&self) -> &'static str;

    fn transform_outbound(&mut self, frame: Frame) -> Result<Frame, Error>;

    fn transform_inbound(&mut self, frame: Frame) -> Result<Frame, Error>;

    /// Called exactly once when the connection reaches its terminal state.
    fn shutdown(&mut self) {}
}

/// Builds extension instances during the upgrade. A factory is consulted on
/// both roles: the client sends `client_offer` and instantiates from the
/// server's response, the server inspects each matching offer and either
/// accepts it with a response header fragment or declines.
pub trait ExtensionFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// The header fragment this extension contributes to the client upgrade
    /// request, or `None` to stay silent.
    fn client_offer(&self) -> Option<String>;

    /// Server side: decide on one client offer. `Ok(None)` declines.
    fn accept_offer(
        &self,
        offer: &ExtensionOffer,
    ) -> Result<Option<(String, Box<dyn WebSocketExtension>)>, Error>;

    /// Client side: instantiate from the parameters the server selected.
    fn accept_response(&self, response: &ExtensionOffer)
        -> Result<Box<dyn WebSocketExtension>, Error>;
}

/// Server-side extension selection: each factory is consulted with the
/// offers bearing its name, in configuration order. Accepted fragments are
/// comma-joined into the response header value.
pub(crate) fn negotiate_server(
    factories: &[std::sync::Arc<dyn ExtensionFactory>],
    offers: &[ExtensionOffer],
) -> Result<(Option<String>, Vec<Box<dyn WebSocketExtension>>), Error> {
    let mut fragments: Vec<String> = Vec::new();
    let mut instances: Vec<Box<dyn WebSocketExtension>> = Vec::new();

    for factory in factories {
        for offer in offers.iter().filter(|offer| offer.name == factory.name()) {
            if let Some((fragment, instance)) = factory.accept_offer(offer)? {
                fragments.push(fragment);
                instances.push(instance);
                break;
            }
        }
    }

    let header = if fragments.is_empty() {
        None
    } else {
        Some(fragments.join(", "))
    };
    Ok((header, instances))
}

/// Client-side extension instantiation from the server response. A server
/// selecting an extension that was never offered fails the upgrade.
pub(crate) fn negotiate_client(
    factories: &[std::sync::Arc<dyn ExtensionFactory>],
    responses: &[ExtensionOffer],
) -> Result<Vec<Box<dyn WebSocketExtension>>, Error> {
    let mut instances = Vec::new();

    for response in responses {
        let factory = factories
            .iter()
            .find(|factory| factory.name() == response.name)
            .ok_or_else(|| Error::UnsupportedExtension(response.name.clone()))?;
        instances.push(factory.accept_response(response)?);
    }

    Ok(instances)
}

/// The ordered extension pipeline owned by a connection.
pub(crate) struct ExtensionStack {
    extensions: Vec<Box<dyn WebSocketExtension>>,
    shut_down: bool,
}

impl ExtensionStack {
    pub fn new(extensions: Vec<Box<dyn WebSocketExtension>>) -> Self {
        Self {
            extensions,
            shut_down: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn transform_outbound(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        for extension in self.extensions.iter_mut() {
            frame = extension.transform_outbound(frame)?;
        }
        Ok(frame)
    }

    pub fn transform_inbound(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        for extension in self.extensions.iter_mut().rev() {
            frame = extension.transform_inbound(frame)?;
        }
        Ok(frame)
    }

    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for extension in self.extensions.iter_mut() {
            extension.shutdown();
        }
    }
}
