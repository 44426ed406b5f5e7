/// Identifier of an indexed object, handed out by the data relation.
pub type ObjectId = u64;

/// Page ID addressing a node through the page file.
pub type PageId = u64;
