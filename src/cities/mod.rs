mod types;

pub use types::{
    render_rows, CityRecord, PopulationUpdate, RangeField, RangeQuery, RangeRequest, StringQuery,
};
