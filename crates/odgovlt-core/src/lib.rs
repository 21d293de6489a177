//! Domain model for the opendata.gov.lt legacy harvester: source rows, catalog
//! payloads, and the pure field mappers (slugs, tags, row encoding).

pub mod catalog;
pub mod slug;
pub mod source;

pub use catalog::{
    find_extra, CatalogOrganization, CatalogPackage, CatalogStatus, CatalogUser, Extra,
    MemberRequest, NewOrganization, NewPackage, NewUser, Tag, ADDRESS_KEY, CODE_KEY,
    SOURCE_ID_KEY,
};
pub use slug::{fixcase, get_package_tags, slugify, slugify_with_length, tagify, PackageTags};
pub use source::{
    encode_datetime, encode_source_row, DatasetRow, OrganizationRow, RowError, SourceRow,
    SourceValue, UserRow,
};

pub const CRATE_NAME: &str = "odgovlt-core";

/// Legacy table names in the `rinkmenos` schema.
pub mod tables {
    pub const USER: &str = "t_user";
    pub const ORGANIZATION: &str = "t_istaiga";
    pub const DATASET: &str = "t_rinkmena";

    pub const ALL: [&str; 3] = [USER, ORGANIZATION, DATASET];
}
