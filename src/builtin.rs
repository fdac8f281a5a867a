//! Derivations shipped with the crate, all over single EEG raw signals.

use serde_json::{Map, Value, json};

use crate::domain::{Data, DataType};
use crate::error::ExpdbError;
use crate::format::{Payload, RawSignal};
use crate::transform::Transform;

fn single_eeg(name: &str, inputs: &[Data]) -> Result<Data, ExpdbError> {
    match inputs {
        [data] if data.data_type() == DataType::Eeg => Ok(*data),
        [data] => Err(ExpdbError::Validation(format!(
            "{name} expects EEG input, got {}",
            data.data_type()
        ))),
        _ => Err(ExpdbError::Validation(format!(
            "{name} takes exactly one input, got {}",
            inputs.len()
        ))),
    }
}

fn single_signal(name: &str, inputs: Vec<Payload>) -> Result<RawSignal, ExpdbError> {
    let mut inputs = inputs.into_iter();
    match (inputs.next(), inputs.next()) {
        (Some(Payload::RawSignal(signal)), None) => Ok(signal),
        (Some(other), None) => Err(ExpdbError::UnsupportedPayload(format!(
            "{name} needs a raw-signal payload, got {}",
            other.representation()
        ))),
        _ => Err(ExpdbError::Validation(format!(
            "{name} takes exactly one input"
        ))),
    }
}

/// Keeps the named channels, in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectChannels {
    pub channels: Vec<String>,
}

impl SelectChannels {
    pub fn new(channels: Vec<String>) -> Result<Self, ExpdbError> {
        if channels.is_empty() {
            return Err(ExpdbError::Validation(
                "select at least one channel".to_string(),
            ));
        }
        Ok(Self { channels })
    }
}

impl Transform for SelectChannels {
    fn name(&self) -> String {
        "SelectChannels".to_string()
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("channels".to_string(), json!(self.channels));
        params
    }

    fn output_data(&self, inputs: &[Data]) -> Result<Data, ExpdbError> {
        single_eeg(&self.name(), inputs)
    }

    fn transform(&self, inputs: Vec<Payload>) -> Result<Payload, ExpdbError> {
        let signal = single_signal(&self.name(), inputs)?;
        let data = self
            .channels
            .iter()
            .map(|name| {
                signal
                    .channel_by_name(name)
                    .map(<[f32]>::to_vec)
                    .ok_or_else(|| ExpdbError::Validation(format!("no channel named {name}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        RawSignal::new(signal.sampling_rate(), self.channels.clone(), data).map(Payload::from)
    }
}

/// Keeps every `factor`-th sample and divides the sampling rate accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimate {
    pub factor: usize,
}

impl Decimate {
    pub fn new(factor: usize) -> Result<Self, ExpdbError> {
        if factor == 0 {
            return Err(ExpdbError::Validation(
                "decimation factor must be positive".to_string(),
            ));
        }
        Ok(Self { factor })
    }
}

impl Transform for Decimate {
    fn name(&self) -> String {
        "Decimate".to_string()
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("factor".to_string(), json!(self.factor));
        params
    }

    fn output_data(&self, inputs: &[Data]) -> Result<Data, ExpdbError> {
        let input = single_eeg(&self.name(), inputs)?;
        Data::new(
            input.sampling_rate() / self.factor as f64,
            input.modality(),
            input.data_type(),
        )
    }

    fn transform(&self, inputs: Vec<Payload>) -> Result<Payload, ExpdbError> {
        let signal = single_signal(&self.name(), inputs)?;
        let data: Vec<Vec<f32>> = (0..signal.channels().len())
            .map(|index| {
                signal
                    .channel(index)
                    .unwrap_or_default()
                    .iter()
                    .step_by(self.factor)
                    .copied()
                    .collect::<Vec<f32>>()
            })
            .collect();
        RawSignal::new(
            signal.sampling_rate() / self.factor as f64,
            signal.channels().to_vec(),
            data,
        )
        .map(Payload::from)
    }
}

/// Runs `first`, then `second` on its output. Provenance records both.
#[derive(Debug, Clone)]
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A: Transform, B: Transform> Chain<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Transform, B: Transform> Transform for Chain<A, B> {
    fn name(&self) -> String {
        self.names().join("->")
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "steps".to_string(),
            Value::from(
                self.param_list()
                    .into_iter()
                    .map(Value::Object)
                    .collect::<Vec<_>>(),
            ),
        );
        params
    }

    fn names(&self) -> Vec<String> {
        let mut names = self.first.names();
        names.extend(self.second.names());
        names
    }

    fn param_list(&self) -> Vec<Map<String, Value>> {
        let mut params = self.first.param_list();
        params.extend(self.second.param_list());
        params
    }

    fn input_data(&self) -> Option<Data> {
        self.first.input_data()
    }

    fn output_data(&self, inputs: &[Data]) -> Result<Data, ExpdbError> {
        let middle = self.first.output_data(inputs)?;
        self.second.output_data(&[middle])
    }

    fn transform(&self, inputs: Vec<Payload>) -> Result<Payload, ExpdbError> {
        let middle = self.first.transform(inputs)?;
        self.second.transform(vec![middle])
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::Modality;

    fn signal() -> Payload {
        RawSignal::new(
            100.0,
            vec!["Fz".to_string(), "Cz".to_string(), "Pz".to_string()],
            vec![
                vec![0.0, 1.0, 2.0, 3.0],
                vec![10.0, 11.0, 12.0, 13.0],
                vec![20.0, 21.0, 22.0, 23.0],
            ],
        )
        .unwrap()
        .into()
    }

    #[test]
    fn select_keeps_requested_order() {
        let select = SelectChannels::new(vec!["Pz".to_string(), "Fz".to_string()]).unwrap();
        let Payload::RawSignal(out) = select.transform(vec![signal()]).unwrap() else {
            panic!("expected raw signal");
        };
        assert_eq!(out.channels(), &["Pz".to_string(), "Fz".to_string()]);
        assert_eq!(out.channel(0).unwrap(), &[20.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn select_unknown_channel_fails() {
        let select = SelectChannels::new(vec!["O1".to_string()]).unwrap();
        assert_matches!(
            select.transform(vec![signal()]),
            Err(ExpdbError::Validation(_))
        );
    }

    #[test]
    fn decimate_divides_rate() {
        let decimate = Decimate::new(2).unwrap();
        let Payload::RawSignal(out) = decimate.transform(vec![signal()]).unwrap() else {
            panic!("expected raw signal");
        };
        assert_eq!(out.sampling_rate(), 50.0);
        assert_eq!(out.channel_by_name("Cz").unwrap(), &[10.0, 12.0]);

        let input = Data::new(100.0, Modality::Imaging, DataType::Eeg).unwrap();
        assert_eq!(decimate.output_data(&[input]).unwrap().sampling_rate(), 50.0);
    }

    #[test]
    fn chain_concatenates_provenance() {
        let chain = Chain::new(
            SelectChannels::new(vec!["Cz".to_string()]).unwrap(),
            Decimate::new(4).unwrap(),
        );
        assert_eq!(chain.names(), vec!["SelectChannels", "Decimate"]);
        assert_eq!(chain.param_list().len(), 2);
        assert_eq!(chain.param_list()[1]["factor"], json!(4));
    }
}
