/*!
# Fleet DevKit - Test Support for the Fleet Simulator

Helpers for asserting the simulator's wire contracts without a broker:
- Telemetry topic parsing and validation
- Envelope key/shape checks
- Per-archetype sample range checks
*/

pub mod envelope;

pub use envelope::{check_sample, parse_envelope, parse_topic, EnvelopeView, TopicParts};
